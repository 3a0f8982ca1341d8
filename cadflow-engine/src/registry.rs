use std::collections::HashMap;

use crate::operation::Operation;
use crate::operations::{CreateArc, CreateCircle, CreateLine};

pub type OperationFactory = Box<dyn Fn() -> Box<dyn Operation> + Send + Sync>;

/// 操作名到构造函数的映射。
pub struct OperationRegistry {
    factories: HashMap<String, OperationFactory>,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl OperationRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// 注册内置的创建类操作。
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register_default::<CreateLine>(CreateLine::NAME);
        registry.register_default::<CreateCircle>(CreateCircle::NAME);
        registry.register_default::<CreateArc>(CreateArc::NAME);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Operation> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn register_default<O>(&mut self, name: impl Into<String>)
    where
        O: Operation + Default + 'static,
    {
        self.register(name, || Box::new(O::default()) as Box<dyn Operation>);
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn Operation>> {
        self.factories.get(name).map(|factory| factory())
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// 已注册的操作名，按字母序。
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
