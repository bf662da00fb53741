use super::*;
use enumset::EnumSet;

impl ScalarDType {
    const fn promotion_lattice(self) -> &'static [Self] {
        use ScalarDType::*;
        match self {
            Int4 => &[Int8],
            UInt4 => &[Int8, UInt8],
            Int8 => &[Int16],
            Int16 => &[Int32],
            Int32 => &[Int64],
            Int64 => &[Float16, BFloat16],
            UInt8 => &[Int16, UInt16],
            UInt16 => &[Int32, UInt32],
            UInt32 => &[Int64, UInt64],
            UInt64 => &[Float16, BFloat16],
            Float16 => &[Float32],
            BFloat16 => &[Float32],
            Float32 => &[Float64],
            Float64 | Void => &[],
        }
    }

    fn get_recursive_parents(self) -> EnumSet<Self> {
        self.promotion_lattice()
            .iter()
            .fold(EnumSet::only(self), |dtypes, &parent| dtypes.union(parent.get_recursive_parents()))
    }

    /// Check if a buffer currently typed `self` can be promoted to `to` without losing values.
    ///
    /// This is a partial order over width and signedness: it is reflexive, antisymmetric
    /// and transitive, and unrelated types (e.g. signed to unsigned) are incomparable.
    pub fn can_safe_cast(self, to: Self) -> bool {
        if self == to {
            return true;
        }
        if matches!(self, Self::Void) || matches!(to, Self::Void) {
            return false;
        }

        let (from_bits, to_bits) = (self.bits(), to.bits());
        match (self.is_unsigned(), self.is_signed(), self.is_float(), to.is_unsigned(), to.is_signed(), to.is_float()) {
            // Unsigned -> Unsigned: target at least as wide
            (true, _, _, true, _, _) => from_bits <= to_bits,
            // Signed -> Signed: target at least as wide
            (_, true, _, _, true, _) => from_bits <= to_bits,
            // Unsigned -> Signed: target strictly wider (room for the sign bit)
            (true, _, _, _, true, _) => from_bits < to_bits,
            // Integer -> Float: every integer value must fit into the significand
            (_, _, false, _, _, true) => {
                let magnitude_bits = if self.is_signed() { from_bits - 1 } else { from_bits };
                magnitude_bits <= to.mantissa_bits()
            }
            // Float -> Float: target covers both significand and exponent range
            (_, _, true, _, _, true) => {
                self.mantissa_bits() <= to.mantissa_bits() && self.exponent_bits() <= to.exponent_bits()
            }
            _ => false,
        }
    }

    /// Check whether a required type `self` accepts a buffer currently typed `other`.
    pub fn can_upcast_from(self, other: Self) -> bool {
        other.can_safe_cast(self)
    }

    /// Check if every constant value fits into this type.
    ///
    /// Non-integer targets accept any integer constant that fits into their significand.
    pub fn can_represent(self, values: &[i64]) -> bool {
        match (self.min_value(), self.max_value()) {
            (Some(min), Some(max)) => values.iter().all(|&v| (min..=max).contains(&(v as i128))),
            _ if self.is_float() => {
                let limit = 1i128 << self.mantissa_bits();
                values.iter().all(|&v| (v as i128).abs() <= limit)
            }
            _ => false,
        }
    }

    /// Smallest integer type of the requested signedness that holds every value.
    pub fn smallest_int_for(values: &[i64], signed: bool) -> Option<Self> {
        use ScalarDType::*;
        let candidates: &[Self] =
            if signed { &[Int4, Int8, Int16, Int32, Int64] } else { &[UInt4, UInt8, UInt16, UInt32, UInt64] };
        candidates.iter().copied().find(|dtype| dtype.can_represent(values))
    }
}

impl DType {
    /// Check if casting from `from` to `to` is safe (preserves value).
    ///
    /// Pointers compare by their pointee; the address space is not part of the order.
    pub fn can_safe_cast(from: &Self, to: &Self) -> bool {
        match (from, to) {
            (Self::Scalar(f), Self::Scalar(t)) => f.can_safe_cast(*t),
            (Self::Ptr { base: f, .. }, Self::Ptr { base: t, .. }) => Self::can_safe_cast(f, t),
            _ => false,
        }
    }

    /// Find the least upper bound type for a set of dtypes.
    ///
    /// Returns the smallest scalar type that all input types promote to
    /// along the promotion lattice. Pointers contribute their pointee.
    pub fn least_upper_dtype(dtypes: &[Self]) -> Option<Self> {
        let scalar_result = dtypes
            .iter()
            .map(|d| d.base())
            .map(|s| s.get_recursive_parents())
            .reduce(|lhs, rhs| lhs.intersection(rhs))?
            .iter()
            .min()?; // min by discriminant (= priority: lower = more specific)

        Some(DType::Scalar(scalar_result))
    }
}
