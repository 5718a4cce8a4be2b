//! Text-to-value mapping for command and capture arguments.
//!
//! A [`TypeMapper`] maps a raw token to an [`Arg`] for a given [`ParamType`].
//! Core scalar types are mapped by [`CoreMapper`], registered by default;
//! applications add their own types with [`TypeMapper::register`]:
//!
//! ```rust,ignore
//! struct ColorMapper;
//!
//! impl CustomMapper for ColorMapper {
//!     fn types(&self) -> &[&'static str] {
//!         &["color"]
//!     }
//!
//!     fn map(&self, ty: &ParamType, value: &str) -> Result<Arg, MapError> {
//!         let rgb = parse_hex(value).map_err(|e| MapError::parse(ty.name(), value, e))?;
//!         Ok(Arg::Custom(serde_json::to_value(rgb)?))
//!     }
//! }
//!
//! let mut mapper = TypeMapper::new();
//! mapper.register(ColorMapper)?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::{ExtractError, ExtractResult, MapError};

// ============================================================================
// Parameter types
// ============================================================================

/// Target type of a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
    /// An application type mapped by a registered [`CustomMapper`].
    Custom(&'static str),
}

impl ParamType {
    pub fn name(&self) -> &'static str {
        match self {
            ParamType::Bool => "bool",
            ParamType::I8 => "i8",
            ParamType::I16 => "i16",
            ParamType::I32 => "i32",
            ParamType::I64 => "i64",
            ParamType::U8 => "u8",
            ParamType::U16 => "u16",
            ParamType::U32 => "u32",
            ParamType::U64 => "u64",
            ParamType::F32 => "f32",
            ParamType::F64 => "f64",
            ParamType::String => "string",
            ParamType::Custom(name) => *name,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A declared method parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: ParamType,
    pub required: bool,
    pub description: Option<String>,
}

impl Param {
    /// Declares a parameter whose type is inferred from `T`.
    ///
    /// `Option<T>` declares an optional parameter.
    pub fn of<T: FromArg>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: T::TYPE,
            required: T::REQUIRED,
            description: None,
        }
    }

    /// Declares a required parameter of a custom mapped type.
    pub fn custom(name: impl Into<String>, ty: &'static str) -> Self {
        Self {
            name: name.into(),
            ty: ParamType::Custom(ty),
            required: true,
            description: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// ============================================================================
// Argument values
// ============================================================================

/// A bound argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Custom(serde_json::Value),
    /// An optional parameter with no token to bind.
    Missing,
}

/// Conversion from a bound [`Arg`] into a handler-facing type.
pub trait FromArg: Sized {
    /// The parameter type this conversion expects.
    const TYPE: ParamType;
    /// Whether a parameter of this type must be present.
    const REQUIRED: bool = true;

    fn from_arg(arg: &Arg) -> Option<Self>;
}

macro_rules! impl_from_arg_int {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromArg for $ty {
                const TYPE: ParamType = ParamType::$variant;

                fn from_arg(arg: &Arg) -> Option<Self> {
                    match arg {
                        Arg::Int(v) => <$ty>::try_from(*v).ok(),
                        Arg::UInt(v) => <$ty>::try_from(*v).ok(),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_from_arg_int!(
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
);

impl FromArg for bool {
    const TYPE: ParamType = ParamType::Bool;

    fn from_arg(arg: &Arg) -> Option<Self> {
        match arg {
            Arg::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromArg for f64 {
    const TYPE: ParamType = ParamType::F64;

    fn from_arg(arg: &Arg) -> Option<Self> {
        match arg {
            Arg::Float(v) => Some(*v),
            Arg::Int(v) => Some(*v as f64),
            Arg::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl FromArg for f32 {
    const TYPE: ParamType = ParamType::F32;

    fn from_arg(arg: &Arg) -> Option<Self> {
        f64::from_arg(arg).map(|v| v as f32)
    }
}

impl FromArg for String {
    const TYPE: ParamType = ParamType::String;

    fn from_arg(arg: &Arg) -> Option<Self> {
        match arg {
            Arg::Text(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl<T: FromArg> FromArg for Option<T> {
    const TYPE: ParamType = T::TYPE;
    const REQUIRED: bool = false;

    fn from_arg(arg: &Arg) -> Option<Self> {
        match arg {
            Arg::Missing => Some(None),
            other => T::from_arg(other).map(Some),
        }
    }
}

/// Positional arguments bound for one method invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Arg>);

impl Args {
    pub fn new(args: Vec<Arg>) -> Self {
        Self(args)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn raw(&self) -> &[Arg] {
        &self.0
    }

    /// Returns argument `index` converted to `T`.
    ///
    /// Indices past the bound arguments read as [`Arg::Missing`], so optional
    /// parameters may be requested even when nothing was bound.
    pub fn get<T: FromArg>(&self, index: usize) -> ExtractResult<T> {
        let value = match self.0.get(index) {
            Some(arg) => T::from_arg(arg),
            None => T::from_arg(&Arg::Missing),
        };
        value.ok_or(ExtractError::ArgType {
            index,
            expected: T::TYPE.name(),
        })
    }

    /// Decodes a custom-mapped argument.
    pub fn custom<T: DeserializeOwned>(&self, index: usize) -> ExtractResult<T> {
        match self.0.get(index) {
            Some(Arg::Custom(value)) => serde_json::from_value(value.clone())
                .map_err(|e| ExtractError::custom(format!("argument {index}: {e}"))),
            _ => Err(ExtractError::ArgType {
                index,
                expected: "custom value",
            }),
        }
    }
}

impl From<Vec<Arg>> for Args {
    fn from(args: Vec<Arg>) -> Self {
        Self(args)
    }
}

// ============================================================================
// Mappers
// ============================================================================

/// Maps text to values for a set of types.
pub trait CustomMapper: Send + Sync + 'static {
    /// Names of the types this mapper handles.
    fn types(&self) -> &[&'static str];

    fn map(&self, ty: &ParamType, value: &str) -> Result<Arg, MapError>;
}

/// Mapper for the built-in scalar types.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreMapper;

fn parse<T>(ty: &ParamType, value: &str) -> Result<T, MapError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| MapError::parse(ty.name(), value, e))
}

impl CustomMapper for CoreMapper {
    fn types(&self) -> &[&'static str] {
        &[
            "bool", "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64",
        ]
    }

    fn map(&self, ty: &ParamType, value: &str) -> Result<Arg, MapError> {
        Ok(match ty {
            ParamType::Bool => Arg::Bool(matches!(value, "true" | "1")),
            ParamType::I8 => Arg::Int(parse::<i8>(ty, value)?.into()),
            ParamType::I16 => Arg::Int(parse::<i16>(ty, value)?.into()),
            ParamType::I32 => Arg::Int(parse::<i32>(ty, value)?.into()),
            ParamType::I64 => Arg::Int(parse::<i64>(ty, value)?),
            ParamType::U8 => Arg::UInt(parse::<u8>(ty, value)?.into()),
            ParamType::U16 => Arg::UInt(parse::<u16>(ty, value)?.into()),
            ParamType::U32 => Arg::UInt(parse::<u32>(ty, value)?.into()),
            ParamType::U64 => Arg::UInt(parse::<u64>(ty, value)?),
            ParamType::F32 => Arg::Float(parse::<f32>(ty, value)?.into()),
            ParamType::F64 => Arg::Float(parse::<f64>(ty, value)?),
            ParamType::String => Arg::Text(value.to_string()),
            ParamType::Custom(name) => return Err(MapError::Unmapped((*name).to_string())),
        })
    }
}

/// Registry of mappers keyed by type name.
#[derive(Clone)]
pub struct TypeMapper {
    mappers: HashMap<&'static str, Arc<dyn CustomMapper>>,
}

impl Default for TypeMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeMapper {
    /// Creates a mapper with [`CoreMapper`] registered.
    pub fn new() -> Self {
        let core: Arc<dyn CustomMapper> = Arc::new(CoreMapper);
        let mappers = core
            .types()
            .iter()
            .map(|name| (*name, Arc::clone(&core)))
            .collect();
        Self { mappers }
    }

    /// Registers a mapper for every type it declares.
    ///
    /// Fails without registering anything if one of its types is already
    /// mapped.
    pub fn register<M: CustomMapper>(&mut self, mapper: M) -> Result<(), MapError> {
        let mapper: Arc<dyn CustomMapper> = Arc::new(mapper);
        if let Some(conflict) = mapper
            .types()
            .iter()
            .find(|name| **name == "string" || self.mappers.contains_key(*name))
        {
            return Err(MapError::Conflict((*conflict).to_string()));
        }
        for name in mapper.types() {
            self.mappers.insert(*name, Arc::clone(&mapper));
        }
        Ok(())
    }

    /// Returns `true` if values of `ty` can be mapped.
    pub fn supports(&self, ty: &ParamType) -> bool {
        matches!(ty, ParamType::String) || self.mappers.contains_key(ty.name())
    }

    /// Maps `value` to `ty`.
    pub fn map(&self, ty: &ParamType, value: &str) -> Result<Arg, MapError> {
        if let ParamType::String = ty {
            return Ok(Arg::Text(value.to_string()));
        }
        match self.mappers.get(ty.name()) {
            Some(mapper) => mapper.map(ty, value),
            None => Err(MapError::Unmapped(ty.name().to_string())),
        }
    }
}

impl fmt::Debug for TypeMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.mappers.keys().collect();
        types.sort();
        f.debug_struct("TypeMapper").field("types", &types).finish()
    }
}
