pub mod number;
pub mod registrar;

pub use number::{OrderNumber, OrderNumberError};
pub use registrar::{OrderRegistrar, Registration};
