pub mod payment;
pub mod plan;
pub mod response;
pub mod transfer;

pub use payment::*;
pub use plan::*;
pub use response::*;
pub use transfer::*;
