use std::any::Any;
use std::borrow::Borrow;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::path::PathBuf;
use std::rc::Rc;

use crate::engine::Handler;
use crate::error::RuntimeError;
use crate::node::Node;

/// A single scope level. The root answers every lookup with its fallback
/// and refuses to be modified.
enum Scope<K, V> {
    Root {
        fallback: Option<V>,
    },
    Child {
        /// Bindings made at this level.
        bindings: RefCell<HashMap<K, V>>,
        /// Enclosing scope, consulted for keys not bound here.
        parent: Environment<K, V>,
    },
}

/// A chain of scopes. Cloning an environment shares the underlying scope,
/// so a binding made through one handle is visible through every clone.
pub struct Environment<K, V> {
    scope: Rc<Scope<K, V>>,
}

impl<K, V> Clone for Environment<K, V> {
    fn clone(&self) -> Self {
        Environment {
            scope: Rc::clone(&self.scope),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Environment<K, V> {
    pub fn root(fallback: Option<V>) -> Self {
        Environment {
            scope: Rc::new(Scope::Root { fallback }),
        }
    }

    /// A new scope whose parent is `self`.
    pub fn extend(&self, overrides: HashMap<K, V>) -> Self {
        Environment {
            scope: Rc::new(Scope::Child {
                bindings: RefCell::new(overrides),
                parent: self.clone(),
            }),
        }
    }

    pub fn child(&self) -> Self {
        self.extend(HashMap::new())
    }

    /// Look a key up here and then in each parent, ending at the root fallback.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut current = self;
        loop {
            match current.scope.as_ref() {
                Scope::Root { fallback } => return fallback.clone(),
                Scope::Child { bindings, parent } => {
                    if let Some(value) = bindings.borrow().get(key) {
                        return Some(value.clone());
                    }
                    current = parent;
                }
            }
        }
    }

    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Whether `key` is bound at this level, ignoring parents.
    pub fn has_local<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.scope.as_ref() {
            Scope::Root { .. } => false,
            Scope::Child { bindings, .. } => bindings.borrow().contains_key(key),
        }
    }

    pub fn set(&self, key: K, value: V) -> Result<(), RuntimeError> {
        match self.scope.as_ref() {
            Scope::Root { .. } => Err(RuntimeError::ImmutableRoot),
            Scope::Child { bindings, .. } => {
                bindings.borrow_mut().insert(key, value);
                Ok(())
            }
        }
    }

    /// Remove a binding made at this level.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.scope.as_ref() {
            Scope::Root { .. } => None,
            Scope::Child { bindings, .. } => bindings.borrow_mut().remove(key),
        }
    }

    /// The bindings made at this level.
    pub fn local_bindings(&self) -> HashMap<K, V> {
        match self.scope.as_ref() {
            Scope::Root { .. } => HashMap::new(),
            Scope::Child { bindings, .. } => bindings.borrow().clone(),
        }
    }

    /// Replace every binding made at this level. Clones of this environment
    /// see the new bindings.
    pub fn reset(&self, replacement: HashMap<K, V>) -> Result<(), RuntimeError> {
        match self.scope.as_ref() {
            Scope::Root { .. } => Err(RuntimeError::ImmutableRoot),
            Scope::Child { bindings, .. } => {
                *bindings.borrow_mut() = replacement;
                Ok(())
            }
        }
    }

    /// Every key bound anywhere along the chain. The root fallback binds no key.
    pub fn bound_keys(&self) -> HashSet<K> {
        let mut keys = HashSet::new();
        let mut current = self;
        while let Scope::Child { bindings, parent } = current.scope.as_ref() {
            keys.extend(bindings.borrow().keys().cloned());
            current = parent;
        }
        keys
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.scope, &other.scope)
    }
}

/// Dispatch from the next character (`None` at end of input) to its reader.
pub type CharEnv = Environment<Option<char>, Handler>;

/// Escape names and ambient state.
pub type MacroEnv = Environment<String, Binding>;

/// What a name in a [`MacroEnv`] can stand for.
#[derive(Clone)]
pub enum Binding {
    Macro(Handler),
    Text(String),
    Path(PathBuf),
    Flag(bool),
    Names(Vec<String>),
    Node(Node),
    /// Module state shared between the handlers of one block.
    Shared(Rc<dyn Any>),
}

impl MacroEnv {
    pub fn handler(&self, name: &str) -> Option<Handler> {
        match self.get(name)? {
            Binding::Macro(handler) => Some(handler),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Binding::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn path(&self, key: &str) -> Option<PathBuf> {
        match self.get(key)? {
            Binding::Path(path) => Some(path),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some(Binding::Flag(true)))
    }

    pub fn names(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Binding::Names(names)) => names,
            _ => Vec::new(),
        }
    }

    pub fn node(&self, key: &str) -> Option<Node> {
        match self.get(key)? {
            Binding::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn shared<T: 'static>(&self, key: &str) -> Option<Rc<T>> {
        match self.get(key)? {
            Binding::Shared(value) => value.downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn set_macro(&self, name: &str, handler: Handler) -> Result<(), RuntimeError> {
        self.set(name.to_string(), Binding::Macro(handler))
    }
}
