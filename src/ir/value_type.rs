//! Value type lattice
//!
//! A [`ValueType`] summarizes what the optimizer knows about a JS value at a program
//! point: the set of primitive kinds it may hold, whether that set is definite or only
//! a profile-derived guess ("likely"), and for objects, which array shape it has.
//!
//! ```text
//! Uninitialized ⊑ {Undefined, Null, Boolean, Int, Float, String, Object{...}} ⊑ Any
//! ```
//!
//! Definite types are guarantees; likely types are hints that must be validated by a
//! bailout check before the optimizer relies on them.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Primitive kinds a value may hold
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TypeBits: u16 {
        const UNDEFINED = 1 << 0;
        const NULL = 1 << 1;
        const BOOLEAN = 1 << 2;
        /// Numbers representable as int32
        const INT = 1 << 3;
        /// Numbers not representable as int32 (fractions, -0, NaN, out of range)
        const FLOAT = 1 << 4;
        const STRING = 1 << 5;
        const SYMBOL = 1 << 6;
        const OBJECT = 1 << 7;
        const SIMD128_F4 = 1 << 8;
        const SIMD128_I4 = 1 << 9;

        const NUMBER = Self::INT.bits() | Self::FLOAT.bits();
        const ANY = Self::UNDEFINED.bits()
            | Self::NULL.bits()
            | Self::BOOLEAN.bits()
            | Self::INT.bits()
            | Self::FLOAT.bits()
            | Self::STRING.bits()
            | Self::SYMBOL.bits()
            | Self::OBJECT.bits();
    }
}

/// Shape of an object value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ObjectType {
    /// Not an object, or nothing known about the object's shape
    #[default]
    Unknown,
    Object,
    Function,
    /// Plain object with indexed (array-like) storage
    ObjectWithArray,
    /// JS array with boxed elements
    Array,
    /// JS array with packed int32 elements
    NativeIntArray,
    /// JS array with packed float64 elements
    NativeFloatArray,
    Int8Array,
    Uint8Array,
    Uint8ClampedArray,
    Int16Array,
    Uint16Array,
    Int32Array,
    Uint32Array,
    Float32Array,
    Float64Array,
}

impl ObjectType {
    /// JS arrays (boxed or native)
    pub fn is_js_array(self) -> bool {
        matches!(
            self,
            ObjectType::Array | ObjectType::NativeIntArray | ObjectType::NativeFloatArray
        )
    }

    /// Arrays stored unboxed (int or float elements)
    pub fn is_native_array(self) -> bool {
        matches!(self, ObjectType::NativeIntArray | ObjectType::NativeFloatArray)
    }

    /// Any of the typed array kinds
    pub fn is_typed_array(self) -> bool {
        matches!(
            self,
            ObjectType::Int8Array
                | ObjectType::Uint8Array
                | ObjectType::Uint8ClampedArray
                | ObjectType::Int16Array
                | ObjectType::Uint16Array
                | ObjectType::Int32Array
                | ObjectType::Uint32Array
                | ObjectType::Float32Array
                | ObjectType::Float64Array
        )
    }

    /// Array shapes whose element storage the optimizer knows how to address directly
    pub fn is_optimized_array(self) -> bool {
        self.is_js_array() || self.is_typed_array() || self == ObjectType::ObjectWithArray
    }

    /// Element loads from this array produce int32 values
    pub fn has_int_elements(self) -> bool {
        matches!(
            self,
            ObjectType::NativeIntArray
                | ObjectType::Int8Array
                | ObjectType::Uint8Array
                | ObjectType::Uint8ClampedArray
                | ObjectType::Int16Array
                | ObjectType::Uint16Array
                | ObjectType::Int32Array
        )
    }

    /// Element loads from this array produce float64 values
    pub fn has_float_elements(self) -> bool {
        matches!(
            self,
            ObjectType::NativeFloatArray
                | ObjectType::Uint32Array
                | ObjectType::Float32Array
                | ObjectType::Float64Array
        )
    }

    /// Generality rank among JS array kinds; a boxed array can hold anything a native one can.
    fn js_array_rank(self) -> u8 {
        match self {
            ObjectType::NativeIntArray => 0,
            ObjectType::NativeFloatArray => 1,
            _ => 2,
        }
    }

    /// Join two object shapes. The flag is set when the result must be weakened to likely.
    pub fn merge(self, other: ObjectType) -> (ObjectType, bool) {
        if self == other {
            return (self, false);
        }
        if self.is_js_array() && other.is_js_array() {
            let merged = if self.js_array_rank() >= other.js_array_rank() {
                self
            } else {
                other
            };
            return (merged, true);
        }
        (ObjectType::Object, false)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectType::Unknown => "Object",
            ObjectType::Object => "Object",
            ObjectType::Function => "Function",
            ObjectType::ObjectWithArray => "ObjectWithArray",
            ObjectType::Array => "Array",
            ObjectType::NativeIntArray => "NativeIntArray",
            ObjectType::NativeFloatArray => "NativeFloatArray",
            ObjectType::Int8Array => "Int8Array",
            ObjectType::Uint8Array => "Uint8Array",
            ObjectType::Uint8ClampedArray => "Uint8ClampedArray",
            ObjectType::Int16Array => "Int16Array",
            ObjectType::Uint16Array => "Uint16Array",
            ObjectType::Int32Array => "Int32Array",
            ObjectType::Uint32Array => "Uint32Array",
            ObjectType::Float32Array => "Float32Array",
            ObjectType::Float64Array => "Float64Array",
        };
        write!(f, "{}", name)
    }
}

/// Compact type knowledge about a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueType {
    bits: TypeBits,
    likely: bool,
    #[serde(default)]
    object: ObjectType,
    #[serde(default)]
    no_missing_values: bool,
}

impl Default for ValueType {
    fn default() -> Self {
        ValueType::UNINITIALIZED
    }
}

impl ValueType {
    pub const UNINITIALIZED: ValueType = ValueType::from_bits(TypeBits::empty(), false);
    pub const ANY: ValueType = ValueType::from_bits(TypeBits::ANY, false);
    pub const UNDEFINED: ValueType = ValueType::from_bits(TypeBits::UNDEFINED, false);
    pub const NULL: ValueType = ValueType::from_bits(TypeBits::NULL, false);
    pub const BOOLEAN: ValueType = ValueType::from_bits(TypeBits::BOOLEAN, false);
    pub const INT: ValueType = ValueType::from_bits(TypeBits::INT, false);
    pub const LIKELY_INT: ValueType = ValueType::from_bits(TypeBits::INT, true);
    pub const FLOAT: ValueType = ValueType::from_bits(TypeBits::FLOAT, false);
    pub const LIKELY_FLOAT: ValueType = ValueType::from_bits(TypeBits::FLOAT, true);
    pub const NUMBER: ValueType = ValueType::from_bits(TypeBits::NUMBER, false);
    pub const LIKELY_NUMBER: ValueType = ValueType::from_bits(TypeBits::NUMBER, true);
    pub const STRING: ValueType = ValueType::from_bits(TypeBits::STRING, false);
    pub const LIKELY_STRING: ValueType = ValueType::from_bits(TypeBits::STRING, true);
    pub const SIMD128_F4: ValueType = ValueType::from_bits(TypeBits::SIMD128_F4, false);
    pub const SIMD128_I4: ValueType = ValueType::from_bits(TypeBits::SIMD128_I4, false);
    pub const OBJECT: ValueType = ValueType::object(ObjectType::Object);

    pub const fn from_bits(bits: TypeBits, likely: bool) -> Self {
        ValueType {
            bits,
            likely,
            object: ObjectType::Unknown,
            no_missing_values: false,
        }
    }

    /// Definite object of the given shape
    pub const fn object(kind: ObjectType) -> Self {
        ValueType {
            bits: TypeBits::OBJECT,
            likely: false,
            object: kind,
            no_missing_values: false,
        }
    }

    /// Definite array of the given shape
    pub fn array(kind: ObjectType, no_missing_values: bool) -> Self {
        ValueType {
            bits: TypeBits::OBJECT,
            likely: false,
            object: kind,
            no_missing_values: no_missing_values && kind.is_js_array(),
        }
    }

    /// Likely array of the given shape, as profile data reports it
    pub fn likely_array(kind: ObjectType, no_missing_values: bool) -> Self {
        ValueType::array(kind, no_missing_values).to_likely()
    }

    pub fn bits(&self) -> TypeBits {
        self.bits
    }

    pub fn object_type(&self) -> ObjectType {
        self.object
    }

    pub fn has_no_missing_values(&self) -> bool {
        self.no_missing_values
    }

    /// No type information at all
    pub fn is_uninitialized(&self) -> bool {
        self.bits.is_empty()
    }

    /// Known for certain, not only from the profile
    pub fn is_definite(&self) -> bool {
        !self.likely && !self.is_uninitialized()
    }

    /// Known only from the profile
    pub fn is_likely(&self) -> bool {
        self.likely && !self.is_uninitialized()
    }

    fn is_only(&self, bits: TypeBits) -> bool {
        !self.is_uninitialized() && bits.contains(self.bits)
    }

    /// Definitely a tagged int
    pub fn is_int(&self) -> bool {
        self.is_definite() && self.bits == TypeBits::INT
    }

    /// Int, definitely or likely
    pub fn is_likely_int(&self) -> bool {
        !self.is_uninitialized() && self.bits == TypeBits::INT
    }

    /// Definitely a float
    pub fn is_float(&self) -> bool {
        self.is_definite() && self.bits == TypeBits::FLOAT
    }

    /// Likely a number, and not likely an int
    pub fn is_likely_float(&self) -> bool {
        self.is_only(TypeBits::NUMBER) && self.bits.contains(TypeBits::FLOAT)
    }

    /// Definitely some number, int or float
    pub fn is_number(&self) -> bool {
        self.is_definite() && self.is_only(TypeBits::NUMBER)
    }

    pub fn is_likely_number(&self) -> bool {
        self.is_only(TypeBits::NUMBER)
    }

    /// Definitely not an int; int specialization would always bail out
    pub fn is_not_int(&self) -> bool {
        self.is_definite() && !self.bits.contains(TypeBits::INT)
    }

    /// Definitely not a number
    pub fn is_not_number(&self) -> bool {
        self.is_definite() && !self.bits.intersects(TypeBits::NUMBER)
    }

    /// Definitely not an object
    pub fn is_primitive(&self) -> bool {
        self.is_definite() && !self.bits.intersects(TypeBits::OBJECT)
    }

    pub fn is_boolean(&self) -> bool {
        self.is_definite() && self.bits == TypeBits::BOOLEAN
    }

    pub fn is_string(&self) -> bool {
        self.is_definite() && self.bits == TypeBits::STRING
    }

    pub fn is_likely_string(&self) -> bool {
        !self.is_uninitialized() && self.bits == TypeBits::STRING
    }

    /// Definitely an object
    pub fn is_object(&self) -> bool {
        self.is_definite() && self.bits == TypeBits::OBJECT
    }

    /// Object, definitely or likely
    pub fn is_likely_object(&self) -> bool {
        !self.is_uninitialized() && self.bits == TypeBits::OBJECT
    }

    pub fn is_simd128_f4(&self) -> bool {
        self.is_definite() && self.bits == TypeBits::SIMD128_F4
    }

    pub fn is_likely_simd128_f4(&self) -> bool {
        !self.is_uninitialized() && self.bits == TypeBits::SIMD128_F4
    }

    pub fn is_simd128_i4(&self) -> bool {
        self.is_definite() && self.bits == TypeBits::SIMD128_I4
    }

    pub fn is_likely_simd128_i4(&self) -> bool {
        !self.is_uninitialized() && self.bits == TypeBits::SIMD128_I4
    }

    /// Whether the value may be a tagged (non-pointer) value, in which case an object check is needed
    pub fn can_be_tagged_value(&self) -> bool {
        !self.is_definite() || self.bits.intersects(TypeBits::NUMBER)
    }

    /// Definitely a JavaScript array
    pub fn is_array(&self) -> bool {
        self.is_object() && self.object.is_js_array()
    }

    pub fn is_likely_array(&self) -> bool {
        self.is_likely_object() && self.object.is_js_array()
    }

    /// Definitely a native int or float array
    pub fn is_native_array(&self) -> bool {
        self.is_object() && self.object.is_native_array()
    }

    pub fn is_likely_native_array(&self) -> bool {
        self.is_likely_object() && self.object.is_native_array()
    }

    pub fn is_likely_native_int_array(&self) -> bool {
        self.is_likely_object() && self.object == ObjectType::NativeIntArray
    }

    pub fn is_likely_native_float_array(&self) -> bool {
        self.is_likely_object() && self.object == ObjectType::NativeFloatArray
    }

    /// Definitely a typed array
    pub fn is_typed_array(&self) -> bool {
        self.is_object() && self.object.is_typed_array()
    }

    pub fn is_likely_typed_array(&self) -> bool {
        self.is_likely_object() && self.object.is_typed_array()
    }

    /// Definitely an array kind the optimizer has a fast path for
    pub fn is_any_optimized_array(&self) -> bool {
        self.is_object() && self.object.is_optimized_array()
    }

    /// Likely an array kind the optimizer has a fast path for
    pub fn is_likely_any_optimized_array(&self) -> bool {
        self.is_likely_object() && self.object.is_optimized_array()
    }

    /// Definitely an array, or an object backed by one
    pub fn is_array_or_object_with_array(&self) -> bool {
        self.is_object()
            && (self.object.is_js_array() || self.object == ObjectType::ObjectWithArray)
    }

    /// Likely an array, or an object backed by one
    pub fn is_likely_array_or_object_with_array(&self) -> bool {
        self.is_likely_object()
            && (self.object.is_js_array() || self.object == ObjectType::ObjectWithArray)
    }

    /// Drop the `likely` qualifier, as after a check that confirmed the type
    pub fn to_definite(self) -> Self {
        ValueType {
            likely: false,
            ..self
        }
    }

    /// Weaken to a profile-only type. Uninitialized stays uninitialized.
    pub fn to_likely(self) -> Self {
        if self.is_uninitialized() {
            return self;
        }
        ValueType {
            likely: true,
            ..self
        }
    }

    /// The type after a passed object check. Non-object types become a plain object.
    pub fn to_definite_object(self) -> Self {
        let object = if self.bits.contains(TypeBits::OBJECT) {
            self.object
        } else {
            ObjectType::Object
        };
        ValueType {
            bits: TypeBits::OBJECT,
            likely: false,
            object,
            no_missing_values: self.no_missing_values,
        }
    }

    /// Only arrays can be known to have no missing values
    pub fn with_no_missing_values(self, no_missing_values: bool) -> Self {
        ValueType {
            no_missing_values: no_missing_values && self.object.is_js_array(),
            ..self
        }
    }

    /// Change the object kind; the missing-values fact only survives on arrays
    pub fn with_object_type(self, object: ObjectType) -> Self {
        ValueType {
            object,
            no_missing_values: self.no_missing_values && object.is_js_array(),
            ..self
        }
    }

    /// Lattice join: the result admits every value either input admits.
    pub fn merge(self, other: ValueType) -> ValueType {
        if self == other {
            return self;
        }
        if self.is_uninitialized() {
            return other;
        }
        if other.is_uninitialized() {
            return self;
        }

        let bits = self.bits | other.bits;
        let mut likely = self.likely || other.likely;
        let self_object = self.bits.contains(TypeBits::OBJECT);
        let other_object = other.bits.contains(TypeBits::OBJECT);
        let (object, no_missing_values) = match (self_object, other_object) {
            (true, true) => {
                let (object, weaken) = self.object.merge(other.object);
                likely |= weaken;
                (object, self.no_missing_values && other.no_missing_values)
            }
            (true, false) => (self.object, self.no_missing_values),
            (false, true) => (other.object, other.no_missing_values),
            (false, false) => (ObjectType::Unknown, false),
        };

        ValueType {
            bits,
            likely,
            object,
            no_missing_values: no_missing_values && object.is_js_array(),
        }
    }

    /// Whether every value admitted by `self` is also admitted by `other`
    pub fn is_subset_of(&self, other: &ValueType) -> bool {
        if self.is_uninitialized() || other.likely {
            return true;
        }
        if other.is_uninitialized() || self.likely {
            return false;
        }
        if !other.bits.contains(self.bits) {
            return false;
        }
        if self.bits.contains(TypeBits::OBJECT) {
            let other_kind = other.object;
            let kind_ok = matches!(other_kind, ObjectType::Unknown | ObjectType::Object)
                || other_kind == self.object;
            if !kind_ok {
                return false;
            }
            if other.no_missing_values && !self.no_missing_values {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_uninitialized() {
            return write!(f, "Uninitialized");
        }
        if self.likely {
            write!(f, "Likely")?;
        }
        if self.bits == TypeBits::ANY {
            return write!(f, "Any");
        }
        if self.bits == TypeBits::OBJECT {
            write!(f, "{}", self.object)?;
            if self.no_missing_values {
                write!(f, "[NoMissingValues]")?;
            }
            return Ok(());
        }
        let name = match self.bits {
            b if b == TypeBits::INT => "Int",
            b if b == TypeBits::FLOAT => "Float",
            b if b == TypeBits::NUMBER => "Number",
            b if b == TypeBits::BOOLEAN => "Boolean",
            b if b == TypeBits::STRING => "String",
            b if b == TypeBits::UNDEFINED => "Undefined",
            b if b == TypeBits::NULL => "Null",
            b if b == TypeBits::SYMBOL => "Symbol",
            b if b == TypeBits::SIMD128_F4 => "Simd128F4",
            b if b == TypeBits::SIMD128_I4 => "Simd128I4",
            _ => return write!(f, "Mixed({:?})", self.bits),
        };
        write!(f, "{}", name)
    }
}
