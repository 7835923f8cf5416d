//! Schema-guided depth-first traversal.
//!
//! [`walk`] visits a data tree alongside its schema and reports what it sees
//! to an [`Observer`]. The sequence for every node is fixed:
//!
//! ```text
//! enter(node)
//!   object: for each key in document order
//!     visit_property(child) → enter(child) … leave(child)   (unless vetoed)
//!   array: for each element
//!     visit_array_item(child, i) → enter(child) … leave(child)
//! leave(node)
//! ```
//!
//! Each context handed to an observer already carries its one effective
//! schema node; a value no schema branch admits is reported with
//! [`Shape::Opaque`] and is never descended into. The walker never mutates
//! the data.
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::resolver::{ResolveError, Resolver};
use crate::schema::{Schema, SchemaNode};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// How the walker treats a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Object,
    Array,
    /// no schema applies; passed through verbatim
    Opaque,
}

/// Observer verdict: keep descending or skip the subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Per-node traversal state. Built fresh on every descent and never changed
/// once an observer has seen it.
#[derive(Debug, Clone)]
pub struct Context<'a> {
    pub path: Vec<PathSegment>,
    /// `None` exactly when `shape` is [`Shape::Opaque`]
    pub schema: Option<Arc<SchemaNode>>,
    pub shape: Shape,
    pub value: &'a Value,
    pub parent: Option<&'a Value>,
    pub key: Option<PathSegment>,
}

/// Consumer of traversal events. Every callback has a no-op default, so an
/// implementation only spells out the events it cares about.
pub trait Observer {
    fn enter(&mut self, _ctx: &Context<'_>) -> Flow {
        Flow::Continue
    }

    fn leave(&mut self, _ctx: &Context<'_>) {}

    /// Called before descending into an object property; `Stop` skips the
    /// property's subtree.
    fn visit_property(&mut self, _ctx: &Context<'_>) -> Flow {
        Flow::Continue
    }

    /// Called before descending into an array element. Elements are always
    /// entered; veto their children from [`Observer::enter`] instead.
    fn visit_array_item(&mut self, _ctx: &Context<'_>, _index: usize) {}
}

/// The identity pass.
impl Observer for () {}

type EnterFn<'f> = Box<dyn FnMut(&Context<'_>) -> Flow + 'f>;
type LeaveFn<'f> = Box<dyn FnMut(&Context<'_>) + 'f>;
type ItemFn<'f> = Box<dyn FnMut(&Context<'_>, usize) + 'f>;

/// An observer assembled from optional closures.
#[derive(Default)]
pub struct Callbacks<'f> {
    pub on_enter: Option<EnterFn<'f>>,
    pub on_leave: Option<LeaveFn<'f>>,
    pub on_property: Option<EnterFn<'f>>,
    pub on_array_item: Option<ItemFn<'f>>,
}

/// Several observers behind one. An observer that vetoes a subtree stops
/// receiving events for it while the others carry on; the walker only skips
/// the subtree when every observer has vetoed it.
pub struct Fanout<'o> {
    slots: Vec<Slot<'o>>,
}

struct Slot<'o> {
    observer: &'o mut dyn Observer,
    mute: Option<Mute>,
}

#[derive(Clone, Copy)]
struct Mute {
    /// events at this depth or deeper are withheld
    from: usize,
    /// the `leave` at this depth closes the vetoed subtree
    lift_at: usize,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(&key.replace('~', "~0").replace('/', "~1")),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

impl<'a> Context<'a> {
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// The property name this node was reached by, if any.
    pub fn property_name(&self) -> Option<&str> {
        match &self.key {
            Some(PathSegment::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// JSON Pointer to this node (`""` for the root).
    pub fn pointer(&self) -> String {
        self.path.iter().map(|segment| format!("/{segment}")).collect()
    }
}

impl<'f> Callbacks<'f> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_enter(mut self, f: impl FnMut(&Context<'_>) -> Flow + 'f) -> Self {
        self.on_enter = Some(Box::new(f));
        self
    }

    pub fn on_leave(mut self, f: impl FnMut(&Context<'_>) + 'f) -> Self {
        self.on_leave = Some(Box::new(f));
        self
    }

    pub fn on_property(mut self, f: impl FnMut(&Context<'_>) -> Flow + 'f) -> Self {
        self.on_property = Some(Box::new(f));
        self
    }

    pub fn on_array_item(mut self, f: impl FnMut(&Context<'_>, usize) + 'f) -> Self {
        self.on_array_item = Some(Box::new(f));
        self
    }
}

impl Observer for Callbacks<'_> {
    fn enter(&mut self, ctx: &Context<'_>) -> Flow {
        self.on_enter.as_mut().map_or(Flow::Continue, |f| f(ctx))
    }
    fn leave(&mut self, ctx: &Context<'_>) {
        if let Some(f) = self.on_leave.as_mut() {
            f(ctx)
        }
    }
    fn visit_property(&mut self, ctx: &Context<'_>) -> Flow {
        self.on_property.as_mut().map_or(Flow::Continue, |f| f(ctx))
    }
    fn visit_array_item(&mut self, ctx: &Context<'_>, index: usize) {
        if let Some(f) = self.on_array_item.as_mut() {
            f(ctx, index)
        }
    }
}

impl<'o> Fanout<'o> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn with(mut self, observer: &'o mut dyn Observer) -> Self {
        self.slots.push(Slot { observer, mute: None });
        self
    }
}

impl Default for Fanout<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Slot<'_> {
    fn hears(&self, depth: usize) -> bool {
        self.mute.is_none_or(|mute| depth < mute.from)
    }
}

impl Observer for Fanout<'_> {
    fn enter(&mut self, ctx: &Context<'_>) -> Flow {
        let depth = ctx.depth();
        let mut flow = Flow::Stop;
        for slot in self.slots.iter_mut().filter(|slot| slot.hears(depth)) {
            match slot.observer.enter(ctx) {
                Flow::Continue => flow = Flow::Continue,
                Flow::Stop => slot.mute = Some(Mute { from: depth + 1, lift_at: depth }),
            }
        }
        flow
    }

    fn leave(&mut self, ctx: &Context<'_>) {
        let depth = ctx.depth();
        for slot in &mut self.slots {
            if slot.hears(depth) {
                slot.observer.leave(ctx);
            }
            if slot.mute.is_some_and(|mute| mute.lift_at == depth) {
                slot.mute = None;
            }
        }
    }

    fn visit_property(&mut self, ctx: &Context<'_>) -> Flow {
        let depth = ctx.depth();
        let mut flow = Flow::Stop;
        let mut vetoed = Vec::new();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if !slot.hears(depth) {
                continue;
            }
            match slot.observer.visit_property(ctx) {
                Flow::Continue => flow = Flow::Continue,
                Flow::Stop => {
                    slot.mute = Some(Mute { from: depth, lift_at: depth });
                    vetoed.push(i);
                }
            }
        }
        // nobody descends, so no leave will arrive to lift these
        if flow == Flow::Stop {
            for i in vetoed {
                self.slots[i].mute = None;
            }
        }
        flow
    }

    fn visit_array_item(&mut self, ctx: &Context<'_>, index: usize) {
        let depth = ctx.depth();
        for slot in self.slots.iter_mut().filter(|slot| slot.hears(depth)) {
            slot.observer.visit_array_item(ctx, index);
        }
    }
}

/// Walk `data` against `schema`, reporting every node to `observer`.
///
/// Fails only on a cyclic schema reference; values no schema admits are
/// reported as [`Shape::Opaque`] and their siblings are still visited.
pub fn walk<O: Observer + ?Sized>(data: &Value, schema: &Schema, observer: &mut O) -> Result<(), ResolveError> {
    let walker = Walker { resolver: Resolver::new(schema) };
    let root = walker.context(Vec::new(), Some(schema.root()), data, None, None)?;
    walker.visit(&root, observer)
}

struct Walker<'s> {
    resolver: Resolver<'s>,
}

impl Walker<'_> {
    fn context<'a>(
        &self,
        path: Vec<PathSegment>,
        declared: Option<&Arc<SchemaNode>>,
        value: &'a Value,
        parent: Option<&'a Value>,
        key: Option<PathSegment>,
    ) -> Result<Context<'a>, ResolveError> {
        let schema = match declared {
            Some(node) => self.resolver.effective(node, value)?,
            None => None,
        };
        let shape = match (&schema, value) {
            (None, _) => Shape::Opaque,
            (Some(_), Value::Object(_)) => Shape::Object,
            (Some(_), Value::Array(_)) => Shape::Array,
            (Some(_), _) => Shape::Scalar,
        };
        let ctx = Context { path, schema, shape, value, parent, key };
        if shape == Shape::Opaque {
            tracing::debug!(path = %ctx.pointer(), "no schema applies; passing value through");
        }
        Ok(ctx)
    }

    fn visit<'a, O: Observer + ?Sized>(&self, ctx: &Context<'a>, observer: &mut O) -> Result<(), ResolveError> {
        tracing::trace!(path = %ctx.pointer(), shape = ?ctx.shape, "enter");
        if observer.enter(ctx) == Flow::Continue {
            match (ctx.shape, ctx.value, &ctx.schema) {
                (Shape::Object, Value::Object(map), Some(schema)) => {
                    for (key, value) in map {
                        let segment = PathSegment::Key(key.clone());
                        let mut path = ctx.path.clone();
                        path.push(segment.clone());
                        let declared = schema.property_schema(key);
                        let child = self.context(path, declared.as_ref(), value, Some(ctx.value), Some(segment))?;
                        if observer.visit_property(&child) == Flow::Continue {
                            self.visit(&child, observer)?;
                        }
                    }
                }
                (Shape::Array, Value::Array(items), Some(schema)) => {
                    let item_schema = schema.item_schema();
                    for (index, value) in items.iter().enumerate() {
                        let segment = PathSegment::Index(index);
                        let mut path = ctx.path.clone();
                        path.push(segment.clone());
                        let child = self.context(path, Some(&item_schema), value, Some(ctx.value), Some(segment))?;
                        observer.visit_array_item(&child, index);
                        self.visit(&child, observer)?;
                    }
                }
                _ => {}
            }
        }
        observer.leave(ctx);
        Ok(())
    }
}

// ------------------------------- Tests ------------------------------------ //
