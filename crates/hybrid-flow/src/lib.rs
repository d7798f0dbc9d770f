//! Hybrid Flow - composition primitives
//!
//! Building blocks for assembling iterative optimization workflows out of
//! interchangeable runnables:
//! - Sequencing: [`Branch`]
//! - Fan-out: [`Branches`], [`RacingBranches`], [`Map`]
//! - Fan-in and selection: [`Reduce`], [`MergeSamples`], [`ArgMin`], [`TrackMin`]
//! - Iteration: [`Loop`], [`LoopUntilNoImprovement`], [`LoopWhileNoImprovement`], [`Unwind`]
//! - Leaves: [`Lambda`], [`Dup`], [`Identity`], [`Const`], [`Sleep`], [`Log`]
//!
//! # Example
//!
//! ```rust,ignore
//! use hybrid_flow::prelude::*;
//!
//! # async fn example(tabu: impl Runnable + 'static, anneal: impl Runnable + 'static) -> HybridResult<()> {
//! let workflow = LoopUntilNoImprovement::new(
//!     RacingBranches::new().add(tabu).add(anneal),
//! )
//! .with_patience(3);
//!
//! let best = workflow.run(State::from_problem(my_problem)).result().await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod branch;
pub mod branches;
mod fanout;
pub mod loops;
pub mod map;
pub mod primitives;
pub mod racing;
pub mod reduce;
pub mod select;

// Re-exports for convenience
pub use branch::Branch;
pub use branches::{merge_samples, Branches, FanIn, MergeFn, MergeSamples};
pub use loops::{Loop, LoopCriteria, LoopUntilNoImprovement, LoopWhileNoImprovement, TerminateFn, Unwind};
pub use map::{map_states, Map};
pub use primitives::{Const, Dup, Identity, Lambda, Log, Sleep};
pub use racing::RacingBranches;
pub use reduce::Reduce;
pub use select::{argmin, default_key, min_energy, ArgMin, Key, MinTracker, TrackMin};

/// Prelude module for common imports
pub mod prelude {
    //! Composition primitives together with the core types
    pub use crate::{
        ArgMin, Branch, Branches, Const, Dup, FanIn, Identity, Lambda, Log, Loop,
        LoopUntilNoImprovement, LoopWhileNoImprovement, Map, MergeSamples, RacingBranches, Reduce,
        Sleep, TrackMin, Unwind,
    };
    pub use hybrid_core::prelude::*;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
