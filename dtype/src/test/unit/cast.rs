use test_case::test_case;

use crate::{AddrSpace, DType, ScalarDType};

#[test_case(ScalarDType::Int8, ScalarDType::Int16, true; "int8_to_int16")]
#[test_case(ScalarDType::Int16, ScalarDType::Int8, false; "int16_to_int8")]
#[test_case(ScalarDType::UInt8, ScalarDType::UInt8, true; "uint8_identity")]
#[test_case(ScalarDType::UInt8, ScalarDType::Int16, true; "uint8_to_int16")]
#[test_case(ScalarDType::UInt8, ScalarDType::Int8, false; "uint8_to_int8_same_width")]
#[test_case(ScalarDType::Int8, ScalarDType::UInt32, false; "signed_to_unsigned")]
#[test_case(ScalarDType::UInt4, ScalarDType::Int8, true; "uint4_to_int8")]
#[test_case(ScalarDType::Int4, ScalarDType::Int8, true; "int4_to_int8")]
#[test_case(ScalarDType::Int16, ScalarDType::Float32, true; "int16_to_float32")]
#[test_case(ScalarDType::Int32, ScalarDType::Float32, false; "int32_to_float32")]
#[test_case(ScalarDType::Float16, ScalarDType::BFloat16, false; "half_to_bfloat")]
#[test_case(ScalarDType::Float32, ScalarDType::Int32, false; "float_to_int")]
fn test_can_safe_cast(from: ScalarDType, to: ScalarDType, expected: bool) {
    assert_eq!(from.can_safe_cast(to), expected);
    assert_eq!(to.can_upcast_from(from), expected);
}

#[test]
fn test_pointer_cast_ignores_addrspace() {
    let from = DType::Int8.ptr(AddrSpace::Global);
    let to = DType::Int32.ptr(AddrSpace::Local);
    assert!(DType::can_safe_cast(&from, &to));
    assert!(!DType::can_safe_cast(&to, &from));
    assert!(!DType::can_safe_cast(&DType::Int8, &to));
}

#[test_case(ScalarDType::Int8, &[-128, 0, 127], true; "int8_full_range")]
#[test_case(ScalarDType::Int8, &[128], false; "int8_overflow")]
#[test_case(ScalarDType::UInt8, &[-1], false; "uint8_negative")]
#[test_case(ScalarDType::Int4, &[-8, 7], true; "int4_range")]
#[test_case(ScalarDType::UInt4, &[16], false; "uint4_overflow")]
#[test_case(ScalarDType::Void, &[0], false; "void_holds_nothing")]
fn test_can_represent(dtype: ScalarDType, values: &[i64], expected: bool) {
    assert_eq!(dtype.can_represent(values), expected);
}

#[test]
fn test_smallest_int_for() {
    assert_eq!(ScalarDType::smallest_int_for(&[0, 15], false), Some(ScalarDType::UInt4));
    assert_eq!(ScalarDType::smallest_int_for(&[-1, 100], true), Some(ScalarDType::Int8));
    assert_eq!(ScalarDType::smallest_int_for(&[300], true), Some(ScalarDType::Int16));
}

#[test]
fn test_least_upper_dtype() {
    assert_eq!(DType::least_upper_dtype(&[DType::Int8, DType::UInt8]), Some(DType::Int16));
    assert_eq!(DType::least_upper_dtype(&[DType::Int8, DType::Int32]), Some(DType::Int32));
    assert_eq!(DType::least_upper_dtype(&[DType::UInt4, DType::UInt8]), Some(DType::UInt8));
    assert_eq!(DType::least_upper_dtype(&[]), None);
}
