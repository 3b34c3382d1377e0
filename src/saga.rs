//! Forward-only saga runner.
//!
//! Steps run in order against a shared context. When one fails, the steps
//! that already completed are compensated in reverse and the original error
//! is returned. A failing compensation is logged and the unwind continues.

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::error::Result;

#[async_trait]
pub trait SagaStep<C: Send + Sync>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &mut C) -> Result<()>;

    /// Undo `execute`. Only called for steps whose `execute` succeeded.
    async fn compensate(&self, _ctx: &mut C) -> Result<()> {
        Ok(())
    }
}

pub struct Saga<C: Send + Sync> {
    name: &'static str,
    steps: Vec<Box<dyn SagaStep<C>>>,
}

impl<C: Send + Sync> Saga<C> {
    pub fn new(name: &'static str) -> Self {
        Self { name, steps: Vec::new() }
    }

    pub fn step(mut self, step: impl SagaStep<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub async fn run(&self, ctx: &mut C) -> Result<()> {
        for (idx, step) in self.steps.iter().enumerate() {
            debug!(saga = self.name, step = step.name(), "Executing saga step");
            if let Err(err) = step.execute(ctx).await {
                warn!(saga = self.name, step = step.name(), error = %err, "Saga step failed, compensating");
                self.unwind(idx, ctx).await;
                return Err(err);
            }
        }
        Ok(())
    }

    async fn unwind(&self, failed: usize, ctx: &mut C) {
        for step in self.steps[..failed].iter().rev() {
            if let Err(err) = step.compensate(ctx).await {
                error!(saga = self.name, step = step.name(), error = %err, "Compensation failed");
            }
        }
    }
}
