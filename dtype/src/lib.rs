//! Datatypes for quantized kernel bindings.
//!
//! Scalars are described by their bit width and signedness so that
//! sub-byte quantized types (`Int4`, `UInt4`) participate in the same
//! promotion rules as regular integers. Buffers are always typed through
//! [`DType::Ptr`]; the pointee is the element type.

pub mod cast;

#[cfg(any(test, feature = "proptest"))]
pub mod test;

/// Address space a pointer refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::AsRefStr)]
pub enum AddrSpace {
    /// Slow, large memory outside the compute cluster.
    Global,
    /// Fast, capacity-constrained memory next to the compute engine.
    Local,
}

/// Scalar data types.
#[derive(Debug, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::FromRepr, strum::Display)]
#[derive(enumset::EnumSetType)]
#[cfg_attr(any(test, feature = "proptest"), derive(proptest_derive::Arbitrary))]
#[enumset(repr = "u32")]
pub enum ScalarDType {
    // Interleaved signed/unsigned for correct LUB priority (lower = more specific)
    Int4 = 0,
    UInt4 = 1,
    Int8 = 2,
    UInt8 = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,

    Float16 = 10,
    BFloat16 = 11,
    Float32 = 12,
    Float64 = 13,

    /// Opaque storage (transient scratch, structs).
    Void = 14,
}

/// Data type of a buffer or a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DType {
    /// Scalar type (single value).
    Scalar(ScalarDType),

    /// Pointer type.
    Ptr { base: Box<DType>, addrspace: AddrSpace },
}

impl ScalarDType {
    pub const fn bits(&self) -> usize {
        match self {
            Self::Int4 | Self::UInt4 => 4,
            Self::Int8 | Self::UInt8 => 8,
            Self::Int16 | Self::UInt16 | Self::Float16 | Self::BFloat16 => 16,
            Self::Int32 | Self::UInt32 | Self::Float32 => 32,
            Self::Int64 | Self::UInt64 | Self::Float64 => 64,
            Self::Void => 8,
        }
    }

    /// Storage size of one element, rounded up to whole bytes.
    pub const fn bytes(&self) -> usize {
        self.bits().div_ceil(8)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int4 | Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt4 | Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64)
    }

    /// Number of significand bits (including the implicit one) of a float type.
    pub const fn mantissa_bits(&self) -> usize {
        match self {
            Self::Float16 => 11,
            Self::BFloat16 => 8,
            Self::Float32 => 24,
            Self::Float64 => 53,
            _ => 0,
        }
    }

    /// Number of exponent bits of a float type.
    pub const fn exponent_bits(&self) -> usize {
        match self {
            Self::Float16 => 5,
            Self::BFloat16 | Self::Float32 => 8,
            Self::Float64 => 11,
            _ => 0,
        }
    }

    /// Smallest representable integer value; `None` for non-integers.
    pub const fn min_value(&self) -> Option<i128> {
        if self.is_signed() {
            Some(-(1i128 << (self.bits() - 1)))
        } else if self.is_unsigned() {
            Some(0)
        } else {
            None
        }
    }

    /// Largest representable integer value; `None` for non-integers.
    pub const fn max_value(&self) -> Option<i128> {
        if self.is_signed() {
            Some((1i128 << (self.bits() - 1)) - 1)
        } else if self.is_unsigned() {
            Some((1i128 << self.bits()) - 1)
        } else {
            None
        }
    }

    /// Same width with the opposite signedness. Floats and `Void` are returned unchanged.
    pub const fn with_signedness(self, signed: bool) -> Self {
        match (self, signed) {
            (Self::UInt4, true) => Self::Int4,
            (Self::UInt8, true) => Self::Int8,
            (Self::UInt16, true) => Self::Int16,
            (Self::UInt32, true) => Self::Int32,
            (Self::UInt64, true) => Self::Int64,
            (Self::Int4, false) => Self::UInt4,
            (Self::Int8, false) => Self::UInt8,
            (Self::Int16, false) => Self::UInt16,
            (Self::Int32, false) => Self::UInt32,
            (Self::Int64, false) => Self::UInt64,
            (other, _) => other,
        }
    }

    /// C spelling used by the embedded targets (`stdint.h` names).
    pub const fn c_style(&self) -> &'static str {
        match self {
            // Sub-byte types are stored packed in bytes.
            Self::Int4 => "int8_t",
            Self::UInt4 => "uint8_t",
            Self::Int8 => "int8_t",
            Self::UInt8 => "uint8_t",
            Self::Int16 => "int16_t",
            Self::UInt16 => "uint16_t",
            Self::Int32 => "int32_t",
            Self::UInt32 => "uint32_t",
            Self::Int64 => "int64_t",
            Self::UInt64 => "uint64_t",
            Self::Float16 => "float16",
            Self::BFloat16 => "bfloat16",
            Self::Float32 => "float",
            Self::Float64 => "double",
            Self::Void => "void",
        }
    }
}

impl From<ScalarDType> for DType {
    fn from(scalar: ScalarDType) -> Self {
        Self::Scalar(scalar)
    }
}

impl DType {
    /// Create a pointer type from this dtype.
    pub fn ptr(self, addrspace: AddrSpace) -> Self {
        match self {
            Self::Ptr { base, .. } => Self::Ptr { base, addrspace },
            _ => Self::Ptr { base: Box::new(self), addrspace },
        }
    }

    pub fn scalar(&self) -> Option<ScalarDType> {
        match self {
            Self::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Self::Ptr { .. })
    }

    /// Get the base scalar type (the pointee for pointers).
    pub fn base(&self) -> ScalarDType {
        match self {
            Self::Scalar(s) => *s,
            Self::Ptr { base, .. } => base.base(),
        }
    }

    pub fn addrspace(&self) -> Option<AddrSpace> {
        match self {
            Self::Ptr { addrspace, .. } => Some(*addrspace),
            Self::Scalar(_) => None,
        }
    }

    /// Bits of one element (the pointee for pointers).
    pub fn element_bits(&self) -> usize {
        self.base().bits()
    }

    pub fn bytes(&self) -> usize {
        match self {
            Self::Scalar(s) => s.bytes(),
            // Embedded targets are 32-bit.
            Self::Ptr { .. } => 4,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.base().is_signed()
    }

    pub fn is_int(&self) -> bool {
        self.base().is_int()
    }

    pub fn is_float(&self) -> bool {
        self.base().is_float()
    }

    pub fn c_style(&self) -> String {
        match self {
            Self::Scalar(s) => s.c_style().to_string(),
            Self::Ptr { base, .. } => format!("{}*", base.c_style()),
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{s}"),
            Self::Ptr { base, addrspace } => write!(f, "Ptr<{base}, {addrspace}>"),
        }
    }
}

// Convenient constructors for common scalar types
#[allow(non_upper_case_globals)]
impl DType {
    pub const Int4: Self = Self::Scalar(ScalarDType::Int4);
    pub const UInt4: Self = Self::Scalar(ScalarDType::UInt4);
    pub const Int8: Self = Self::Scalar(ScalarDType::Int8);
    pub const Int16: Self = Self::Scalar(ScalarDType::Int16);
    pub const Int32: Self = Self::Scalar(ScalarDType::Int32);
    pub const Int64: Self = Self::Scalar(ScalarDType::Int64);
    pub const UInt8: Self = Self::Scalar(ScalarDType::UInt8);
    pub const UInt16: Self = Self::Scalar(ScalarDType::UInt16);
    pub const UInt32: Self = Self::Scalar(ScalarDType::UInt32);
    pub const UInt64: Self = Self::Scalar(ScalarDType::UInt64);
    pub const Float16: Self = Self::Scalar(ScalarDType::Float16);
    pub const BFloat16: Self = Self::Scalar(ScalarDType::BFloat16);
    pub const Float32: Self = Self::Scalar(ScalarDType::Float32);
    pub const Float64: Self = Self::Scalar(ScalarDType::Float64);
    pub const Void: Self = Self::Scalar(ScalarDType::Void);
}
