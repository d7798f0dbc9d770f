//! Hybrid Core - state model and execution contract
//!
//! The foundation shared by every composition primitive:
//! - [`State`], [`SampleSet`] and [`Info`]: the copy-on-write data flowing
//!   through a pipeline
//! - [`Runnable`]: the uniform start/stop/await contract
//! - [`RunContext`] and [`RunHandle`]: cooperative cancellation and task
//!   ownership
//! - [`FlowConfig`], [`ExecutionProfile`] and tracing setup
//!
//! # Example
//!
//! ```rust,ignore
//! use hybrid_core::prelude::*;
//!
//! # async fn example(solver: impl Runnable + 'static) -> HybridResult<()> {
//! let handle = solver.run(State::from_problem(my_problem));
//! let output = handle.result().await?;
//! println!("best energy: {:?}", output.as_state().and_then(State::min_energy));
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod info;
pub mod profile;
pub mod runnable;
pub mod sample;
pub mod state;
pub mod telemetry;

// Re-exports for convenience
pub use config::{FailurePolicy, FlowConfig};
pub use error::{HybridError, HybridResult};
pub use info::Info;
pub use profile::{ExecutionProfile, ProfileEntry};
pub use runnable::{
    short_type_name, RunContext, RunHandle, Runnable, RunnableExt, SharedRunnable,
};
pub use sample::{Sample, SampleSet};
pub use state::{BranchFailure, Data, Problem, State, States};
pub use telemetry::{init_tracing, LogFormat};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for building runnables
    pub use crate::{
        Data, FailurePolicy, FlowConfig, HybridError, HybridResult, Info, RunContext, RunHandle,
        Runnable, RunnableExt, Sample, SampleSet, SharedRunnable, State, States,
    };
    pub use async_trait::async_trait;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
