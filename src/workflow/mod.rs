pub mod open_flow;
pub mod submit_flow;

pub use open_flow::{OpenFlow, OpenOutcome};
pub use submit_flow::{SubmitFlow, SubmitOutcome};
