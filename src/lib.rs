use mimalloc::MiMalloc;
use pyo3::prelude::*;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod bins;
mod dataset;
mod efim;
mod error;
mod sink;

#[pymodule]
fn _huim(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(efim::efim, m)?)?;
    m.add_function(wrap_pyfunction!(efim::efim_from_csr, m)?)?;
    m.add_function(wrap_pyfunction!(efim::efim_to_path, m)?)?;
    Ok(())
}
