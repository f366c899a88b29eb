//! Interrupt lines and their handlers
//!
//! MSC error lines are shared and may be level or edge triggered. The
//! [`SoftIrqController`] keeps the handler table in process; something else
//! (the supervisor poll, or a simulated MSC) decides when a line fires.
//! Handlers run on the raising thread and must move to a CPU that can
//! reach their MSC themselves.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MpamError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Not ours
    None,
    Handled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IrqTrigger {
    Level,
    Edge,
}

pub type IrqHandler = Arc<dyn Fn() -> IrqReturn + Send + Sync>;

pub trait IrqController: Send + Sync {
    /// Install a handler on a shared `line`, routed to `cpu`
    fn request_irq(
        &self,
        line: u32,
        trigger: IrqTrigger,
        cpu: u32,
        name: &str,
        handler: IrqHandler,
    ) -> Result<()>;

    /// Remove every handler installed under `name` on `line`
    fn free_irq(&self, line: u32, name: &str);
}

struct Action {
    name: String,
    handler: IrqHandler,
}

struct IrqDesc {
    trigger: IrqTrigger,
    actions: Vec<Action>,
}

#[derive(Default)]
pub struct SoftIrqController {
    lines: RwLock<HashMap<u32, IrqDesc>>,
}

impl SoftIrqController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `line` to every handler sharing it
    pub fn raise(&self, line: u32) -> IrqReturn {
        let handlers: Vec<IrqHandler> = match self.lines.read().get(&line) {
            Some(desc) => desc.actions.iter().map(|a| Arc::clone(&a.handler)).collect(),
            None => return IrqReturn::None,
        };

        let mut ret = IrqReturn::None;
        for handler in handlers {
            if handler() == IrqReturn::Handled {
                ret = IrqReturn::Handled;
            }
        }
        if ret == IrqReturn::None {
            tracing::debug!("Spurious interrupt on line {}", line);
        }
        ret
    }

    pub fn lines(&self) -> Vec<u32> {
        let mut lines: Vec<u32> = self.lines.read().keys().copied().collect();
        lines.sort_unstable();
        lines
    }

    pub fn handler_count(&self, line: u32) -> usize {
        self.lines
            .read()
            .get(&line)
            .map_or(0, |desc| desc.actions.len())
    }
}

impl IrqController for SoftIrqController {
    fn request_irq(
        &self,
        line: u32,
        trigger: IrqTrigger,
        cpu: u32,
        name: &str,
        handler: IrqHandler,
    ) -> Result<()> {
        let mut lines = self.lines.write();
        let desc = lines.entry(line).or_insert_with(|| IrqDesc {
            trigger,
            actions: Vec::new(),
        });
        if desc.trigger != trigger {
            return Err(MpamError::Irq(format!(
                "Line {line} is {:?} triggered, {name} asked for {:?}",
                desc.trigger, trigger
            )));
        }
        desc.actions.push(Action {
            name: name.to_string(),
            handler,
        });
        tracing::debug!("Registered {} on line {} (CPU {})", name, line, cpu);
        Ok(())
    }

    fn free_irq(&self, line: u32, name: &str) {
        let mut lines = self.lines.write();
        if let Some(desc) = lines.get_mut(&line) {
            desc.actions.retain(|a| a.name != name);
            if desc.actions.is_empty() {
                lines.remove(&line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::affinity::current_cpu;
    use parking_lot::Mutex;

    #[test]
    fn test_shared_line_runs_every_handler() {
        let irqs = SoftIrqController::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for (cpu, ret) in [(2, IrqReturn::None), (5, IrqReturn::Handled)] {
            let seen = Arc::clone(&seen);
            irqs.request_irq(
                40,
                IrqTrigger::Edge,
                cpu,
                &format!("msc{cpu}"),
                Arc::new(move || {
                    seen.lock().push((cpu, current_cpu()));
                    ret
                }),
            )
            .unwrap();
        }

        assert_eq!(irqs.raise(40), IrqReturn::Handled);
        // Delivery does not claim a CPU for the handler
        assert_eq!(*seen.lock(), vec![(2, None), (5, None)]);
        assert_eq!(irqs.raise(41), IrqReturn::None);
    }

    #[test]
    fn test_trigger_mismatch_and_free() {
        let irqs = SoftIrqController::new();
        let handler: IrqHandler = Arc::new(|| IrqReturn::Handled);

        irqs.request_irq(7, IrqTrigger::Level, 0, "a", Arc::clone(&handler))
            .unwrap();
        assert!(irqs
            .request_irq(7, IrqTrigger::Edge, 0, "b", Arc::clone(&handler))
            .is_err());

        irqs.free_irq(7, "a");
        assert_eq!(irqs.handler_count(7), 0);
        assert!(irqs.lines().is_empty());
    }
}
