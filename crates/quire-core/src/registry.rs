//! # Module Registry
//!
//! Maps stable type identifiers to typed factories and turns a resolved
//! view into a live module.
//!
//! Persisted state is a postcard-encoded [`StoredState`] envelope carrying
//! the type identifier it was written by. Instantiation restores it only if
//! it decodes and names the requested type; otherwise the state is
//! discarded (logged) and the module starts from its defaults. An
//! unregistered type is the one hard failure.

use crate::module::{Module, ModuleType};
use crate::resolver::ResolvedModuleView;
use crate::ModuleDataId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum InstantiateError {
    #[error("module type not registered: {0}")]
    UnknownType(String),

    #[error("module state could not be encoded: {0}")]
    Encode(#[from] postcard::Error),
}

/// Envelope of persisted module state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredState {
    pub module_type: String,
    pub payload: Vec<u8>,
}

impl StoredState {
    /// Encode the state of a typed module.
    pub fn encode<T: ModuleType>(module: &T) -> Result<Vec<u8>, postcard::Error> {
        let envelope = Self {
            module_type: T::TYPE_ID.to_string(),
            payload: postcard::to_stdvec(module)?,
        };
        postcard::to_stdvec(&envelope)
    }
}

/// Why persisted state was not restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateRejection {
    Malformed(String),
    TypeMismatch { expected: String, found: String },
}

impl fmt::Display for StateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(reason) => write!(f, "malformed state: {reason}"),
            Self::TypeMismatch { expected, found } => {
                write!(f, "state of type {found}, expected {expected}")
            }
        }
    }
}

/// Where an instance's state came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateOrigin {
    Default,
    Restored,
    Discarded(StateRejection),
}

/// Object-safe face of a [`ModuleType`].
pub trait ErasedModule: Module {
    fn type_id(&self) -> &'static str;

    fn encode_state(&self) -> Result<Vec<u8>, postcard::Error>;
}

impl<T: ModuleType> ErasedModule for T {
    fn type_id(&self) -> &'static str {
        T::TYPE_ID
    }

    fn encode_state(&self) -> Result<Vec<u8>, postcard::Error> {
        StoredState::encode(self)
    }
}

#[derive(Clone, Copy)]
struct ModuleFactory {
    create_default: fn() -> Box<dyn ErasedModule>,
    decode: fn(&[u8]) -> Result<Box<dyn ErasedModule>, postcard::Error>,
}

fn create_default<T: ModuleType>() -> Box<dyn ErasedModule> {
    Box::new(T::default())
}

fn decode<T: ModuleType>(payload: &[u8]) -> Result<Box<dyn ErasedModule>, postcard::Error> {
    Ok(Box::new(postcard::from_bytes::<T>(payload)?))
}

/// A live module plus the bookkeeping an editor needs to save it back.
pub struct ModuleInstance {
    module: Box<dyn ErasedModule>,
    data_provenance: Option<ModuleDataId>,
    origin: StateOrigin,
}

impl ModuleInstance {
    #[must_use]
    pub fn module(&self) -> &dyn ErasedModule {
        self.module.as_ref()
    }

    #[must_use]
    pub fn module_type(&self) -> &'static str {
        self.module.type_id()
    }

    /// Row that supplied the state, if any. A later save updates this row.
    #[must_use]
    pub fn data_provenance(&self) -> Option<ModuleDataId> {
        self.data_provenance
    }

    #[must_use]
    pub fn origin(&self) -> &StateOrigin {
        &self.origin
    }

    pub fn encode_state(&self) -> Result<Vec<u8>, postcard::Error> {
        self.module.encode_state()
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("module_type", &self.module_type())
            .field("data_provenance", &self.data_provenance)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Type identifier -> factory.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: BTreeMap<&'static str, ModuleFactory>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `T::TYPE_ID`, replacing any previous factory.
    pub fn register<T: ModuleType>(&mut self) -> &mut Self {
        self.factories.insert(
            T::TYPE_ID,
            ModuleFactory {
                create_default: create_default::<T>,
                decode: decode::<T>,
            },
        );
        self
    }

    #[must_use]
    pub fn contains(&self, module_type: &str) -> bool {
        self.factories.contains_key(module_type)
    }

    pub fn type_ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// Build a default-state instance.
    pub fn create_default(&self, module_type: &str) -> Result<Box<dyn ErasedModule>, InstantiateError> {
        let factory = self.factory(module_type)?;
        Ok((factory.create_default)())
    }

    fn factory(&self, module_type: &str) -> Result<ModuleFactory, InstantiateError> {
        self.factories
            .get(module_type)
            .copied()
            .ok_or_else(|| InstantiateError::UnknownType(module_type.to_string()))
    }

    /// Decode persisted state for `module_type`.
    pub fn decode_state(
        &self,
        module_type: &str,
        bytes: &[u8],
    ) -> Result<Result<Box<dyn ErasedModule>, StateRejection>, InstantiateError> {
        let factory = self.factory(module_type)?;
        Ok(decode_with(&factory, module_type, bytes))
    }

    /// Turn a resolved view into a live module of `module_type`.
    pub fn instantiate(
        &self,
        view: &ResolvedModuleView,
        module_type: &str,
    ) -> Result<ModuleInstance, InstantiateError> {
        let factory = self.factory(module_type)?;

        let (module, origin) = match &view.data {
            None => ((factory.create_default)(), StateOrigin::Default),
            Some(bytes) => match decode_with(&factory, module_type, bytes) {
                Ok(module) => (module, StateOrigin::Restored),
                Err(rejection) => {
                    warn!(
                        module_type,
                        row = ?view.provenance.data,
                        reason = %rejection,
                        "discarding stored module state, using defaults"
                    );
                    ((factory.create_default)(), StateOrigin::Discarded(rejection))
                }
            },
        };

        Ok(ModuleInstance {
            module,
            data_provenance: view.provenance.data,
            origin,
        })
    }
}

fn decode_with(
    factory: &ModuleFactory,
    module_type: &str,
    bytes: &[u8],
) -> Result<Box<dyn ErasedModule>, StateRejection> {
    let envelope: StoredState = postcard::from_bytes(bytes)
        .map_err(|err| StateRejection::Malformed(err.to_string()))?;
    if envelope.module_type != module_type {
        return Err(StateRejection::TypeMismatch {
            expected: module_type.to_string(),
            found: envelope.module_type,
        });
    }
    (factory.decode)(&envelope.payload).map_err(|err| StateRejection::Malformed(err.to_string()))
}

// =============================================================================
// TESTS
// =============================================================================
