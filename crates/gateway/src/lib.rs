//! The Pandora gateway: runtime stores (trace hub, jobs, interventions,
//! permissions, policy), the pipeline scheduler with its eight phase
//! runners, and the HTTP/WS surface.

pub mod api;
pub mod cli;
pub mod runtime;
pub mod state;
