//! Sequential composition

use async_trait::async_trait;
use hybrid_core::{Data, HybridResult, RunContext, Runnable, SharedRunnable};
use std::sync::Arc;

/// Runs components one after another, feeding each output to the next
///
/// A failing component aborts the branch and its error is returned as-is;
/// later components are never started. A stopped branch returns the latest
/// state it holds instead of starting the next component.
#[derive(Debug, Clone, Default)]
pub struct Branch {
    components: Vec<SharedRunnable>,
    name: Option<String>,
}

impl Branch {
    /// Create empty branch (behaves as identity)
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a component
    #[must_use]
    pub fn then(self, component: impl Runnable + 'static) -> Self {
        self.then_shared(Arc::new(component))
    }

    /// Append an already shared component
    #[must_use]
    pub fn then_shared(mut self, component: SharedRunnable) -> Self {
        self.components.push(component);
        self
    }

    /// Set display name
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Number of components
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Check if branch has no components
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Components in execution order
    #[inline]
    #[must_use]
    pub fn components(&self) -> &[SharedRunnable] {
        &self.components
    }
}

impl FromIterator<SharedRunnable> for Branch {
    fn from_iter<I: IntoIterator<Item = SharedRunnable>>(iter: I) -> Self {
        Self {
            components: iter.into_iter().collect(),
            name: None,
        }
    }
}

#[async_trait]
impl Runnable for Branch {
    fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "Branch".to_string())
    }

    async fn next(&self, input: Data, ctx: &RunContext) -> HybridResult<Data> {
        let mut current = input;

        for (step, component) in self.components.iter().enumerate() {
            if ctx.is_cancelled() {
                tracing::debug!(step, "branch stopped before step");
                return Ok(current);
            }

            match ctx.execute(component.as_ref(), current.clone()).await {
                Ok(output) => current = output,
                Err(e) if e.is_cancelled() && ctx.is_cancelled() => {
                    tracing::debug!(step, "branch stopped during step");
                    return Ok(current);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Lambda;
    use hybrid_core::{HybridError, State};
    use hybrid_test_utils::{energies_of, state_with_energies, AddEnergy, Failing, Tag};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn empty_branch_is_identity() {
        let ctx = RunContext::default();
        let out = Branch::new().next(state_with_energies(&[3.0]).into(), &ctx).await.unwrap();
        assert_eq!(energies_of(&out), vec![3.0]);
    }

    #[tokio::test]
    async fn components_run_in_order() {
        let ctx = RunContext::default();
        let branch = Branch::new().then(Tag("a")).then(Tag("b")).then(Tag("c"));
        assert_eq!(branch.len(), 3);

        let out = branch.next(State::new().into(), &ctx).await.unwrap();
        assert_eq!(out.as_state().unwrap().info().get("trail"), Some(&json!(["a", "b", "c"])));
    }

    #[tokio::test]
    async fn failure_skips_later_components() {
        let ctx = RunContext::default();
        let branch = Branch::new()
            .then(AddEnergy(1.0))
            .then(Failing::new("diverged"))
            .then(Tag("never"));

        let err = branch.next(state_with_energies(&[0.0]).into(), &ctx).await.unwrap_err();
        assert!(matches!(err, HybridError::Runnable { ref message, .. } if message == "diverged"));
        assert!(ctx.profile().get("Tag").is_none());
    }

    #[tokio::test]
    async fn stopped_branch_returns_latest_state() {
        let ctx = RunContext::default();
        let stopper = {
            let ctx = ctx.clone();
            Lambda::new("stopper", move |state| {
                ctx.stop();
                Ok(state)
            })
        };
        let branch = Branch::new().then(AddEnergy(1.0)).then(stopper).then(AddEnergy(100.0));

        let out = branch.next(state_with_energies(&[0.0]).into(), &ctx).await.unwrap();
        assert_eq!(energies_of(&out), vec![1.0]);
    }
}
