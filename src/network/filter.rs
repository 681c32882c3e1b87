//! # Filters & Middleware
//!
//! Session events pass through two hook chains per service:
//!
//! * a **filter** returns `bool`; `false` vetoes the event and stops the
//!   rest of both chains (e.g. refuse a connection, drop a message),
//! * a **middleware** only observes and returns nothing.
//!
//! At each [`Opportunity`] all filters run first, in order, then all
//! middlewares. Hooks are attached with [`FilterFunc`] / [`MiddleFunc`] or by
//! implementing [`Filter`] / [`Middle`] directly.
//!
//! ```rust
//! use cube::network::{FilterFunc, FilterRegistry, Opportunity};
//!
//! let mut filters = FilterRegistry::new();
//! filters.register_filter("no-empty", || {
//!     Box::new(FilterFunc::new().on(Opportunity::BeforeReceived, |ctx| ctx.msg.is_some()))
//! });
//! let chain = filters.filter_chain(&["no-empty".to_string()]).unwrap();
//! assert!(chain.has(Opportunity::BeforeReceived));
//! assert!(!chain.has(Opportunity::AfterSend));
//! ```

use crate::error::NetworkError;
use crate::network::context::Context;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Points in a session's life where hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opportunity {
    AfterConnected,
    AfterClosed,
    BeforeReceived,
    AfterReceived,
    BeforeSend,
    AfterSend,
    /// A payload arrived whose message id has no handler.
    ErrorMsgId,
}

impl Opportunity {
    pub const COUNT: usize = 7;

    pub const ALL: [Opportunity; Self::COUNT] = [
        Self::AfterConnected,
        Self::AfterClosed,
        Self::BeforeReceived,
        Self::AfterReceived,
        Self::BeforeSend,
        Self::AfterSend,
        Self::ErrorMsgId,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

pub type FilterHook = Arc<dyn Fn(&mut Context<'_>) -> bool + Send + Sync>;
pub type MiddleHook = Arc<dyn Fn(&mut Context<'_>) + Send + Sync>;

pub trait Filter: Send + Sync {
    fn hook(&self, op: Opportunity) -> Option<FilterHook>;
}

pub trait Middle: Send + Sync {
    fn hook(&self, op: Opportunity) -> Option<MiddleHook>;
}

/// A filter assembled from closures, one slot per opportunity.
#[derive(Clone, Default)]
pub struct FilterFunc {
    hooks: [Option<FilterHook>; Opportunity::COUNT],
}

impl FilterFunc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, op: Opportunity, f: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> bool + Send + Sync + 'static,
    {
        self.hooks[op.index()] = Some(Arc::new(f));
        self
    }
}

impl Filter for FilterFunc {
    fn hook(&self, op: Opportunity) -> Option<FilterHook> {
        self.hooks[op.index()].clone()
    }
}

/// A middleware assembled from closures, one slot per opportunity.
#[derive(Clone, Default)]
pub struct MiddleFunc {
    hooks: [Option<MiddleHook>; Opportunity::COUNT],
}

impl MiddleFunc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, op: Opportunity, f: F) -> Self
    where
        F: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.hooks[op.index()] = Some(Arc::new(f));
        self
    }
}

impl Middle for MiddleFunc {
    fn hook(&self, op: Opportunity) -> Option<MiddleHook> {
        self.hooks[op.index()].clone()
    }
}

#[derive(Clone, Default)]
pub struct FilterChain {
    hooks: [Vec<FilterHook>; Opportunity::COUNT],
}

impl FilterChain {
    fn push(&mut self, filter: &dyn Filter) {
        for op in Opportunity::ALL {
            if let Some(hook) = filter.hook(op) {
                self.hooks[op.index()].push(hook);
            }
        }
    }

    /// Runs the filters for `op`; `false` as soon as one vetoes.
    pub fn fire(&self, op: Opportunity, ctx: &mut Context<'_>) -> bool {
        self.hooks[op.index()].iter().all(|f| f(ctx))
    }

    pub fn has(&self, op: Opportunity) -> bool {
        !self.hooks[op.index()].is_empty()
    }
}

#[derive(Clone, Default)]
pub struct MiddleChain {
    hooks: [Vec<MiddleHook>; Opportunity::COUNT],
}

impl MiddleChain {
    fn push(&mut self, middle: &dyn Middle) {
        for op in Opportunity::ALL {
            if let Some(hook) = middle.hook(op) {
                self.hooks[op.index()].push(hook);
            }
        }
    }

    pub fn fire(&self, op: Opportunity, ctx: &mut Context<'_>) {
        for f in &self.hooks[op.index()] {
            f(ctx);
        }
    }

    pub fn has(&self, op: Opportunity) -> bool {
        !self.hooks[op.index()].is_empty()
    }
}

/// Both chains of a service.
#[derive(Clone, Default)]
pub struct Pipeline {
    pub filters: FilterChain,
    pub middles: MiddleChain,
}

impl Pipeline {
    /// Filters, then middlewares. Returns `false` if a filter vetoed.
    pub fn fire(&self, op: Opportunity, ctx: &mut Context<'_>) -> bool {
        if !self.filters.fire(op, ctx) {
            return false;
        }
        self.middles.fire(op, ctx);
        true
    }

    pub fn has(&self, op: Opportunity) -> bool {
        self.filters.has(op) || self.middles.has(op)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooked: Vec<_> = Opportunity::ALL.into_iter().filter(|op| self.has(*op)).collect();
        f.debug_struct("Pipeline").field("hooked", &hooked).finish()
    }
}

pub type FilterFactory = Arc<dyn Fn() -> Box<dyn Filter> + Send + Sync>;
pub type MiddleFactory = Arc<dyn Fn() -> Box<dyn Middle> + Send + Sync>;

/// Named filter/middleware creators plus a default list.
///
/// A service that names its filters gets exactly those, built fresh from
/// the named creators. A service that names none gets the default list
/// assembled with [`add_filter`](Self::add_filter) /
/// [`add_middle`](Self::add_middle).
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filter_creators: HashMap<String, FilterFactory>,
    middle_creators: HashMap<String, MiddleFactory>,
    filters: Vec<FilterFactory>,
    middles: Vec<MiddleFactory>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_filter<F>(&mut self, name: impl Into<String>, create: F)
    where
        F: Fn() -> Box<dyn Filter> + Send + Sync + 'static,
    {
        self.filter_creators.insert(name.into(), Arc::new(create));
    }

    pub fn register_middle<F>(&mut self, name: impl Into<String>, create: F)
    where
        F: Fn() -> Box<dyn Middle> + Send + Sync + 'static,
    {
        self.middle_creators.insert(name.into(), Arc::new(create));
    }

    pub fn add_filter<F>(&mut self, create: F)
    where
        F: Fn() -> Box<dyn Filter> + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(create));
    }

    pub fn add_middle<F>(&mut self, create: F)
    where
        F: Fn() -> Box<dyn Middle> + Send + Sync + 'static,
    {
        self.middles.push(Arc::new(create));
    }

    pub fn filter_chain(&self, names: &[String]) -> Result<FilterChain, NetworkError> {
        let mut chain = FilterChain::default();
        if names.is_empty() {
            for create in &self.filters {
                chain.push(create().as_ref());
            }
            return Ok(chain);
        }
        for name in names {
            let create = self
                .filter_creators
                .get(name)
                .ok_or_else(|| NetworkError::FilterNotFound(name.clone()))?;
            chain.push(create().as_ref());
        }
        Ok(chain)
    }

    pub fn middle_chain(&self, names: &[String]) -> Result<MiddleChain, NetworkError> {
        let mut chain = MiddleChain::default();
        if names.is_empty() {
            for create in &self.middles {
                chain.push(create().as_ref());
            }
            return Ok(chain);
        }
        for name in names {
            let create = self
                .middle_creators
                .get(name)
                .ok_or_else(|| NetworkError::MiddleNotFound(name.clone()))?;
            chain.push(create().as_ref());
        }
        Ok(chain)
    }

    pub fn pipeline(&self, filters: &[String], middles: &[String]) -> Result<Pipeline, NetworkError> {
        Ok(Pipeline {
            filters: self.filter_chain(filters)?,
            middles: self.middle_chain(middles)?,
        })
    }
}
