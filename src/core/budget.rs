//! 全局迭代预算：整棵委派树共享一个原子计数器
//!
//! 根上下文创建时分配，随 ExecutionContext 克隆句柄传给所有子上下文；
//! 兄弟子任务并发执行时通过 CAS 扣减，保证总消耗不超过上限。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 共享迭代预算句柄（克隆开销为一次 Arc 引用计数）
#[derive(Debug, Clone)]
pub struct IterationBudget {
    consumed: Arc<AtomicUsize>,
    ceiling: usize,
}

impl IterationBudget {
    pub fn new(ceiling: usize) -> Self {
        Self {
            consumed: Arc::new(AtomicUsize::new(0)),
            ceiling,
        }
    }

    /// 尝试消耗一轮；已到上限时返回 false 且不修改计数
    pub fn try_consume(&self) -> bool {
        self.consumed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.ceiling).then_some(used + 1)
            })
            .is_ok()
    }

    pub fn consumed(&self) -> usize {
        self.consumed.load(Ordering::Acquire)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn remaining(&self) -> usize {
        self.ceiling.saturating_sub(self.consumed())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// 两个句柄是否指向同一计数器
    #[cfg(test)]
    pub fn shares_counter_with(&self, other: &IterationBudget) -> bool {
        Arc::ptr_eq(&self.consumed, &other.consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_until_ceiling() {
        let budget = IterationBudget::new(3);
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        assert_eq!(budget.consumed(), 3);
        assert!(budget.is_exhausted());
    }

    #[test]
    fn test_clones_share_counter() {
        let budget = IterationBudget::new(10);
        let child = budget.clone();
        child.try_consume();
        assert_eq!(budget.consumed(), 1);
        assert!(budget.shares_counter_with(&child));
        assert!(!budget.shares_counter_with(&IterationBudget::new(10)));
    }

    #[test]
    fn test_concurrent_consumers_never_overshoot() {
        let budget = IterationBudget::new(1000);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = budget.clone();
                std::thread::spawn(move || {
                    let mut taken = 0;
                    while b.try_consume() {
                        taken += 1;
                    }
                    taken
                })
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1000);
        assert_eq!(budget.consumed(), 1000);
    }
}
