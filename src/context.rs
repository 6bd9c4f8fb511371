use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{self, AtomicU64};
use std::sync::Arc;

use log::{info, warn};
use thread_local::ThreadLocal;

use crate::device::Device;
use crate::shape::{ShapeMode, ShapeModeFlag};

const DYNAMIC_SHAPES_ENV: &str = "LAZYTENSOR_DYNAMIC_SHAPES";
const DEVICE_ENV: &str = "LAZYTENSOR_DEVICE";

static CONTEXT_NEXT_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LazyConfig {
    /// Start the context in [ShapeMode::Dynamic].
    pub dynamic_shapes: bool,
    pub default_device: Device,
}

/// Shared state for every graph built from the same set of [LazyTensor](crate::tensor::LazyTensor)s.
///
/// The context owns the static/dynamic [ShapeMode] consulted by all shape inference, the
/// per-thread stack of provenance scopes attached to new nodes, and a count of the nodes built.
#[derive(Debug)]
pub struct LazyContext {
    id: u64,
    shape_mode: ShapeModeFlag,
    default_device: Device,
    scopes: ThreadLocal<RefCell<Vec<String>>>,
    nodes_created: AtomicU64,
}

/// Pops a scope pushed by [LazyContext::push_scope] when dropped.
///
/// Scope stacks are per thread, so the guard must be dropped on the thread that created it.
#[must_use]
pub struct ScopeGuard<'a> {
    context: &'a LazyContext,
    _not_send: PhantomData<*const ()>,
}

impl LazyConfig {
    /// Reads `LAZYTENSOR_DYNAMIC_SHAPES` and `LAZYTENSOR_DEVICE`, falling back to defaults for
    /// unset or unparsable values.
    pub fn from_env() -> Self {
        let mut config = LazyConfig::default();
        if let Ok(value) = std::env::var(DYNAMIC_SHAPES_ENV) {
            match parse_flag(&value) {
                Some(flag) => config.dynamic_shapes = flag,
                None => warn!("Ignoring unrecognized {DYNAMIC_SHAPES_ENV}={value:?}"),
            }
        }
        if let Ok(value) = std::env::var(DEVICE_ENV) {
            match value.parse() {
                Ok(device) => config.default_device = device,
                Err(e) => warn!("Ignoring {DEVICE_ENV}={value:?}: {e}"),
            }
        }
        config
    }
}

impl LazyContext {
    pub fn new(config: LazyConfig) -> Arc<Self> {
        let initial_mode = if config.dynamic_shapes {
            ShapeMode::Dynamic
        } else {
            ShapeMode::Static
        };
        Arc::new(LazyContext {
            id: CONTEXT_NEXT_ID.fetch_add(1, atomic::Ordering::Relaxed),
            shape_mode: ShapeModeFlag::new(initial_mode),
            default_device: config.default_device,
            scopes: ThreadLocal::new(),
            nodes_created: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn default_device(&self) -> Device {
        self.default_device
    }

    /// The current mode. Another thread may switch the mode between two calls.
    pub fn shape_mode(&self) -> ShapeMode {
        self.shape_mode.load()
    }

    pub fn is_dynamic_mode(&self) -> bool {
        self.shape_mode() == ShapeMode::Dynamic
    }

    /// Switches this context to [ShapeMode::Dynamic] for good.
    pub fn set_dynamic_mode(&self) {
        if self.shape_mode.set_dynamic() == ShapeMode::Static {
            info!("Lazy context {} switched to dynamic shape mode", self.id);
        }
    }

    pub fn push_scope(&self, name: impl Into<String>) -> ScopeGuard<'_> {
        self.scope_stack().borrow_mut().push(name.into());
        ScopeGuard {
            context: self,
            _not_send: PhantomData,
        }
    }

    /// The calling thread's scopes, outermost first, joined with `/`.
    pub fn current_scope(&self) -> Option<String> {
        let stack = self.scope_stack().borrow();
        if stack.is_empty() {
            None
        } else {
            Some(stack.join("/"))
        }
    }

    pub fn nodes_created(&self) -> u64 {
        self.nodes_created.load(atomic::Ordering::Relaxed)
    }

    pub(crate) fn record_node_created(&self) {
        self.nodes_created.fetch_add(1, atomic::Ordering::Relaxed);
    }

    fn scope_stack(&self) -> &RefCell<Vec<String>> {
        self.scopes.get_or_default()
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        let popped = self.context.scope_stack().borrow_mut().pop();
        debug_assert!(popped.is_some());
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
