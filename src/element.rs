//! Declarative element descriptions - the input to reconciliation.
//!
//! An element tree is produced anew on every update and compared against the
//! committed fiber tree. Elements are cheap value types; component
//! definitions are shared behind `Rc` and compared by identity only.

use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::host::HostConfig;
use crate::types::{PropMap, PropValue, StateMap};

// =============================================================================
// Errors
// =============================================================================

/// A component's render function failed.
///
/// Render failures abort the in-progress pass; the previously committed tree
/// stays intact.
#[derive(Debug, Clone, Error)]
#[error("render of `{component}` failed: {message}")]
pub struct RenderError {
    pub component: String,
    pub message: String,
}

impl RenderError {
    pub fn new(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// What a render function produces: the next child elements, or a failure.
pub type RenderResult<H> = Result<Vec<Element<H>>, RenderError>;

// =============================================================================
// Component Definitions
// =============================================================================

/// Render function of a class component: `(props, state, masked_context)`.
pub type RenderFn<H> = Rc<dyn Fn(&PropMap, &StateMap, &PropMap) -> RenderResult<H>>;

/// Render function of a function component: `(props, masked_context)`.
pub type FunctionRenderFn<H> = Rc<dyn Fn(&PropMap, &PropMap) -> RenderResult<H>>;

/// Child-context producer of a class component: `(props, state)`.
pub type ChildContextFn = Rc<dyn Fn(&PropMap, &StateMap) -> PropMap>;

/// Coroutine handler: `(props, collected_yields)` to continuation elements.
pub type CoroutineHandlerFn<H> = Rc<dyn Fn(&PropMap, &[PropValue]) -> Vec<Element<H>>>;

/// A stateful component definition. Shared by every element that renders
/// this component; identity (`Rc::ptr_eq`) is the reconciler's notion of
/// "same type".
pub struct ComponentDef<H: HostConfig> {
    /// Display name, used in diagnostics only.
    pub name: String,
    /// State a fresh instance starts with.
    pub initial_state: StateMap,
    /// Produces the next children from props, state and masked context.
    pub render: RenderFn<H>,
    /// Optional child-context contribution, making this a context provider.
    pub child_context: Option<ChildContextFn>,
    /// Keys this component declares it contributes to child context.
    /// Contributing an undeclared key is reported, not fatal.
    pub child_context_keys: Vec<String>,
    /// Context keys this component declares it consumes. Only these are
    /// visible through the masked context passed to `render`.
    pub context_keys: Vec<String>,
}

impl<H: HostConfig> ComponentDef<H> {
    /// A plain component with no state, context consumption, or provision.
    pub fn stateless(name: impl Into<String>, render: RenderFn<H>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            initial_state: StateMap::new(),
            render,
            child_context: None,
            child_context_keys: Vec::new(),
            context_keys: Vec::new(),
        })
    }
}

/// A stateless component definition.
pub struct FunctionDef<H: HostConfig> {
    pub name: String,
    pub render: FunctionRenderFn<H>,
    /// Context keys visible to `render`.
    pub context_keys: Vec<String>,
}

/// A coroutine definition: children yield values, the handler turns the
/// collected yields into continuation elements.
pub struct CoroutineDef<H: HostConfig> {
    pub name: String,
    pub handler: CoroutineHandlerFn<H>,
}

// =============================================================================
// Elements
// =============================================================================

/// What an element describes. Determines the fiber tag when mounted.
pub enum ElementKind<H: HostConfig> {
    /// A host node with a type name the host adapter understands.
    Host(String),
    /// A host text node.
    Text,
    /// A stateful component.
    Class(Rc<ComponentDef<H>>),
    /// A stateless component.
    Function(Rc<FunctionDef<H>>),
    /// Grouping only; contributes nothing to host output.
    Fragment,
    /// Children render into a foreign container.
    Portal(H::Container),
    /// Coroutine over yielded children.
    Coroutine(Rc<CoroutineDef<H>>),
    /// A value yielded to the nearest enclosing coroutine.
    Yield(PropValue),
}

impl<H: HostConfig> Clone for ElementKind<H> {
    fn clone(&self) -> Self {
        match self {
            ElementKind::Host(ty) => ElementKind::Host(ty.clone()),
            ElementKind::Text => ElementKind::Text,
            ElementKind::Class(def) => ElementKind::Class(def.clone()),
            ElementKind::Function(def) => ElementKind::Function(def.clone()),
            ElementKind::Fragment => ElementKind::Fragment,
            ElementKind::Portal(container) => ElementKind::Portal(container.clone()),
            ElementKind::Coroutine(def) => ElementKind::Coroutine(def.clone()),
            ElementKind::Yield(value) => ElementKind::Yield(value.clone()),
        }
    }
}

impl<H: HostConfig> ElementKind<H> {
    /// Display name for diagnostics.
    pub fn name(&self) -> &str {
        match self {
            ElementKind::Host(ty) => ty,
            ElementKind::Text => "#text",
            ElementKind::Class(def) => &def.name,
            ElementKind::Function(def) => &def.name,
            ElementKind::Fragment => "#fragment",
            ElementKind::Portal(_) => "#portal",
            ElementKind::Coroutine(def) => &def.name,
            ElementKind::Yield(_) => "#yield",
        }
    }

    /// Whether two kinds describe the same logical type.
    ///
    /// Component definitions compare by identity, host types by name.
    /// This is the "same type at the same position" half of the reuse
    /// contract; the other half is the key.
    pub fn same_kind(&self, other: &ElementKind<H>) -> bool {
        match (self, other) {
            (ElementKind::Host(a), ElementKind::Host(b)) => a == b,
            (ElementKind::Text, ElementKind::Text) => true,
            (ElementKind::Class(a), ElementKind::Class(b)) => Rc::ptr_eq(a, b),
            (ElementKind::Function(a), ElementKind::Function(b)) => Rc::ptr_eq(a, b),
            (ElementKind::Fragment, ElementKind::Fragment) => true,
            (ElementKind::Portal(a), ElementKind::Portal(b)) => a == b,
            (ElementKind::Coroutine(a), ElementKind::Coroutine(b)) => Rc::ptr_eq(a, b),
            (ElementKind::Yield(_), ElementKind::Yield(_)) => true,
            _ => false,
        }
    }
}

impl<H: HostConfig> fmt::Debug for ElementKind<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ElementKind").field(&self.name()).finish()
    }
}

/// One node of a declarative element tree.
pub struct Element<H: HostConfig> {
    pub kind: ElementKind<H>,
    /// Optional stable identity for list reconciliation.
    pub key: Option<String>,
    pub props: PropMap,
    pub children: Vec<Element<H>>,
}

impl<H: HostConfig> Clone for Element<H> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            key: self.key.clone(),
            props: self.props.clone(),
            children: self.children.clone(),
        }
    }
}

impl<H: HostConfig> fmt::Debug for Element<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("kind", &self.kind.name())
            .field("key", &self.key)
            .field("children", &self.children.len())
            .finish()
    }
}

impl<H: HostConfig> Element<H> {
    pub fn new(kind: ElementKind<H>, props: PropMap, children: Vec<Element<H>>) -> Self {
        Self {
            kind,
            key: None,
            props,
            children,
        }
    }

    /// A host element with a type name.
    pub fn host(ty: impl Into<String>, props: PropMap, children: Vec<Element<H>>) -> Self {
        Self::new(ElementKind::Host(ty.into()), props, children)
    }

    /// A host text element. The content travels as the `text` prop so text
    /// updates fall out of ordinary prop diffing.
    pub fn text(content: impl Into<String>) -> Self {
        let mut props = PropMap::new();
        props.insert("text".to_string(), PropValue::Str(content.into()));
        Self::new(ElementKind::Text, props, Vec::new())
    }

    /// A class component element.
    pub fn class(def: &Rc<ComponentDef<H>>, props: PropMap) -> Self {
        Self::new(ElementKind::Class(def.clone()), props, Vec::new())
    }

    /// A function component element.
    pub fn function(def: &Rc<FunctionDef<H>>, props: PropMap) -> Self {
        Self::new(ElementKind::Function(def.clone()), props, Vec::new())
    }

    /// A fragment grouping `children`.
    pub fn fragment(children: Vec<Element<H>>) -> Self {
        Self::new(ElementKind::Fragment, PropMap::new(), children)
    }

    /// A portal rendering `children` into `container`.
    pub fn portal(container: H::Container, children: Vec<Element<H>>) -> Self {
        Self::new(ElementKind::Portal(container), PropMap::new(), children)
    }

    /// A coroutine over `children`, continued through `def`'s handler.
    pub fn coroutine(
        def: &Rc<CoroutineDef<H>>,
        props: PropMap,
        children: Vec<Element<H>>,
    ) -> Self {
        Self::new(ElementKind::Coroutine(def.clone()), props, children)
    }

    /// A value yielded to the nearest enclosing coroutine.
    pub fn yielded(value: impl Into<PropValue>) -> Self {
        Self::new(ElementKind::Yield(value.into()), PropMap::new(), Vec::new())
    }

    /// Attach a reconciliation key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Text content of a text element, if this is one.
    pub fn text_content(&self) -> Option<&str> {
        match (&self.kind, self.props.get("text")) {
            (ElementKind::Text, Some(PropValue::Str(s))) => Some(s),
            _ => None,
        }
    }
}
