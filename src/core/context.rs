//! 委派树节点：ExecutionContext 与按索引存储的 ContextArena
//!
//! 子上下文由父上下文纯构造得到（深度 +1、祖先链追加任务名），从不修改父节点；
//! 深度或全局预算超限时构造直接失败，早于任何推理或工具调用。

use serde::Serialize;
use uuid::Uuid;

use crate::core::{EngineError, IterationBudget};

/// 委派树中的一个执行上下文
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub id: Uuid,
    pub task: String,
    /// 0 为根
    pub depth: usize,
    pub max_depth: usize,
    pub parent_id: Option<Uuid>,
    /// 祖先任务名链（根在前，不含自身）
    pub chain: Vec<String>,
    budget: IterationBudget,
}

impl ExecutionContext {
    /// 创建根上下文，并为整棵树分配新的全局预算
    pub fn root(task: impl Into<String>, max_depth: usize, global_iteration_ceiling: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: task.into(),
            depth: 0,
            max_depth,
            parent_id: None,
            chain: Vec::new(),
            budget: IterationBudget::new(global_iteration_ceiling),
        }
    }

    /// 派生子上下文；深度超限返回 DepthExceeded，全局预算耗尽返回 BudgetExceeded
    pub fn child(&self, task: impl Into<String>) -> Result<Self, EngineError> {
        let depth = self.depth + 1;
        if depth > self.max_depth {
            return Err(EngineError::DepthExceeded {
                depth,
                max_depth: self.max_depth,
            });
        }
        if self.budget.is_exhausted() {
            return Err(EngineError::BudgetExceeded {
                consumed: self.budget.consumed(),
                ceiling: self.budget.ceiling(),
            });
        }
        let mut chain = self.chain.clone();
        chain.push(self.task.clone());
        Ok(Self {
            id: Uuid::new_v4(),
            task: task.into(),
            depth,
            max_depth: self.max_depth,
            parent_id: Some(self.id),
            chain,
            budget: self.budget.clone(),
        })
    }

    pub fn budget(&self) -> &IterationBudget {
        &self.budget
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// 是否还能继续向下委派
    pub fn can_delegate(&self) -> bool {
        self.depth < self.max_depth
    }

    /// 祖先链 + 自身，形如 `root > child > self`
    pub fn lineage(&self) -> String {
        let mut parts: Vec<&str> = self.chain.iter().map(String::as_str).collect();
        parts.push(&self.task);
        parts.join(" > ")
    }
}

/// 委派树节点摘要
#[derive(Debug, Clone, Serialize)]
pub struct ContextNode {
    pub id: Uuid,
    pub task: String,
    pub depth: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// 按索引存储的委派树：父节点通过索引持有子节点，不形成互相引用
#[derive(Debug, Default)]
pub struct ContextArena {
    nodes: Vec<ContextNode>,
}

impl ContextArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_root(&mut self, ctx: &ExecutionContext) -> usize {
        self.push(ctx, None)
    }

    /// 记录 parent 下的新子节点；parent 索引无效时按根处理
    pub fn insert_child(&mut self, parent: usize, ctx: &ExecutionContext) -> usize {
        if parent >= self.nodes.len() {
            return self.push(ctx, None);
        }
        let idx = self.push(ctx, Some(parent));
        self.nodes[parent].children.push(idx);
        idx
    }

    fn push(&mut self, ctx: &ExecutionContext, parent: Option<usize>) -> usize {
        self.nodes.push(ContextNode {
            id: ctx.id,
            task: ctx.task.clone(),
            depth: ctx.depth,
            parent,
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn get(&self, idx: usize) -> Option<&ContextNode> {
        self.nodes.get(idx)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// idx 之下所有后代数量
    pub fn descendant_count(&self, idx: usize) -> usize {
        let mut stack: Vec<usize> = match self.nodes.get(idx) {
            Some(n) => n.children.clone(),
            None => return 0,
        };
        let mut count = 0;
        while let Some(i) = stack.pop() {
            count += 1;
            if let Some(n) = self.nodes.get(i) {
                stack.extend(n.children.iter().copied());
            }
        }
        count
    }

    /// idx 及其后代中最深的（绝对）深度
    pub fn max_depth_reached(&self, idx: usize) -> usize {
        let Some(node) = self.nodes.get(idx) else {
            return 0;
        };
        let mut deepest = node.depth;
        let mut stack = node.children.clone();
        while let Some(i) = stack.pop() {
            if let Some(n) = self.nodes.get(i) {
                deepest = deepest.max(n.depth);
                stack.extend(n.children.iter().copied());
            }
        }
        deepest
    }
}
