//! Per-frame typed blackboard shared by passes

use crate::render_graph::error::{RenderGraphError, Result};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;

/// Holds at most one value of each type for the lifetime of a pipeline.
///
/// Passes publish what later passes consume (camera data, G-buffer handles) here instead
/// of holding references to each other.
#[derive(Default)]
pub struct PipelineContainer {
    values: HashMap<TypeId, Box<dyn Any>>,
}

impl PipelineContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value of type `T`, registering `T::default()` first if there is none.
    ///
    /// The first caller creates the instance; later callers receive the same one.
    pub fn create<T: Default + 'static>(&mut self) -> Result<&mut T> {
        self.values
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()))
            .downcast_mut::<T>()
            .ok_or(RenderGraphError::MissingPipelineData {
                type_name: type_name::<T>(),
            })
    }

    pub fn get<T: 'static>(&self) -> Result<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .ok_or(RenderGraphError::MissingPipelineData {
                type_name: type_name::<T>(),
            })
    }

    pub fn get_mut<T: 'static>(&mut self) -> Result<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
            .ok_or(RenderGraphError::MissingPipelineData {
                type_name: type_name::<T>(),
            })
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    /// Remove and return the value of type `T`
    pub fn take<T: 'static>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for PipelineContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContainer")
            .field("len", &self.values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug, PartialEq)]
    struct Exposure(f32);

    #[derive(Default)]
    struct Counter(u32);

    #[test]
    fn test_create_is_first_creator_wins() {
        let mut container = PipelineContainer::new();
        container.create::<Exposure>().unwrap().0 = 2.0;

        let again = container.create::<Exposure>().unwrap();
        assert_eq!(again.0, 2.0);
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn test_get_missing_type_fails() {
        let mut container = PipelineContainer::new();
        container.create::<Counter>().unwrap();

        let err = container.get::<Exposure>().unwrap_err();
        assert!(matches!(
            err,
            RenderGraphError::MissingPipelineData { type_name } if type_name.ends_with("Exposure")
        ));
        assert!(container.get::<Counter>().is_ok());
    }

    #[test]
    fn test_one_instance_per_type() {
        let mut container = PipelineContainer::new();
        container.create::<Counter>().unwrap().0 += 1;
        container.get_mut::<Counter>().unwrap().0 += 1;

        assert_eq!(container.get::<Counter>().unwrap().0, 2);
        assert_eq!(container.take::<Counter>().map(|c| c.0), Some(2));
        assert!(!container.contains::<Counter>());
    }
}
