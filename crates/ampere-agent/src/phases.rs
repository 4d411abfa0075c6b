// Scoped spark acquisition. Entering a phase pushes its spark; the guard
// pops it on drop, so release happens on every exit path including errors
// and cancellation.

use std::sync::Arc;

use parking_lot::Mutex;

use ampere_sparks::{PhaseSpark, Spark, SparkStack};
use ampere_types::Phase;

pub struct SparkScope {
    stack: Arc<Mutex<SparkStack>>,
    spark_name: String,
}

impl SparkScope {
    pub fn enter(stack: Arc<Mutex<SparkStack>>, spark: Spark) -> Self {
        let spark_name = spark.name.clone();
        {
            let mut current = stack.lock();
            *current = current.push(spark);
        }
        Self { stack, spark_name }
    }

    pub fn enter_phase(stack: Arc<Mutex<SparkStack>>, phase: Phase) -> Self {
        Self::enter(stack, PhaseSpark::for_phase(phase))
    }
}

impl Drop for SparkScope {
    fn drop(&mut self) {
        let mut current = self.stack.lock();
        match current.peek() {
            Some(top) if top.name == self.spark_name => {
                if let Some((shrunk, _)) = current.pop() {
                    *current = shrunk;
                }
            }
            Some(top) => {
                // Scopes must unwind LIFO; leave the stack alone rather than
                // pop someone else's spark.
                tracing::warn!(
                    expected = %self.spark_name,
                    found = %top.name,
                    "spark scope released out of order"
                );
            }
            None => {
                tracing::warn!(expected = %self.spark_name, "spark scope released on empty stack");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ampere_sparks::Affinity;

    fn stack() -> Arc<Mutex<SparkStack>> {
        Arc::new(Mutex::new(SparkStack::new(Affinity::Engineering)))
    }

    #[test]
    fn guard_pushes_and_pops_on_drop() {
        let stack = stack();
        {
            let _guard = SparkScope::enter_phase(stack.clone(), Phase::Perceive);
            assert_eq!(stack.lock().depth(), 1);
            assert_eq!(stack.lock().peek().unwrap().name, "phase:perceive");
        }
        assert_eq!(stack.lock().depth(), 0);
    }

    #[test]
    fn guards_nest_lifo() {
        let stack = stack();
        let outer = SparkScope::enter_phase(stack.clone(), Phase::Plan);
        {
            let _inner = SparkScope::enter_phase(stack.clone(), Phase::Execute);
            assert_eq!(stack.lock().depth(), 2);
        }
        assert_eq!(stack.lock().depth(), 1);
        drop(outer);
        assert_eq!(stack.lock().depth(), 0);
    }

    #[test]
    fn guard_releases_on_panic() {
        let stack = stack();
        let stack_for_panic = stack.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = SparkScope::enter_phase(stack_for_panic, Phase::Learn);
            panic!("phase exploded");
        }));
        assert!(result.is_err());
        assert_eq!(stack.lock().depth(), 0);
    }
}
