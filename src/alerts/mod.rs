mod state;
mod window;

pub use state::{AlertOutcome, AlertPolicy, AlertSnapshot, AlertTable, UserId};
