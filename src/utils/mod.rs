pub mod logging;
pub mod tax_id;

pub use tax_id::{digits_only, TaxId, TaxIdError};
