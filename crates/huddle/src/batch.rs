//! Accumulating batch and device-level action merging.

use crate::core::{Action, Partition};
use crate::waiter::Resolver;
use std::collections::HashMap;

/// Merge actions that target the same device, keeping first-seen device order
/// and concatenating commands in submission order.
pub fn merge_actions(actions: impl IntoIterator<Item = Action>) -> Vec<Action> {
    let mut merged: Vec<Action> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for action in actions {
        absorb(&mut merged, &mut index, action);
    }

    merged
}

fn absorb(merged: &mut Vec<Action>, index: &mut HashMap<String, usize>, action: Action) {
    match index.get(&action.device_url) {
        Some(&pos) => merged[pos].commands.extend(action.commands),
        None => {
            index.insert(action.device_url.clone(), merged.len());
            merged.push(action);
        }
    }
}

/// Actions accumulated for one upstream execution, plus everyone waiting on it.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    actions: Vec<Action>,
    index: HashMap<String, usize>,
    partition: Partition,
    resolvers: Vec<Resolver>,
}

impl Batch {
    pub(crate) fn new(partition: Partition) -> Self {
        Self {
            partition,
            ..Self::default()
        }
    }

    /// Merge already-normalized actions into the batch.
    pub(crate) fn extend(&mut self, actions: Vec<Action>) {
        for action in actions {
            absorb(&mut self.actions, &mut self.index, action);
        }
    }

    pub(crate) fn register(&mut self, resolver: Resolver, partition: Partition) {
        self.resolvers.push(resolver);
        self.partition = partition;
    }

    pub(crate) fn partition(&self) -> &Partition {
        &self.partition
    }

    pub(crate) fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub(crate) fn into_parts(self) -> (Vec<Action>, Partition, Vec<Resolver>) {
        (self.actions, self.partition, self.resolvers)
    }
}
