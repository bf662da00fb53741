use crate::{AddrSpace, DType, ScalarDType};

#[test]
fn test_sub_byte_sizes_round_up() {
    assert_eq!(ScalarDType::Int4.bits(), 4);
    assert_eq!(ScalarDType::Int4.bytes(), 1);
    assert_eq!(ScalarDType::Int32.bytes(), 4);
}

#[test]
fn test_integer_ranges() {
    assert_eq!(ScalarDType::Int8.min_value(), Some(-128));
    assert_eq!(ScalarDType::Int8.max_value(), Some(127));
    assert_eq!(ScalarDType::UInt16.max_value(), Some(65535));
    assert_eq!(ScalarDType::UInt64.max_value(), Some(u64::MAX as i128));
    assert_eq!(ScalarDType::Float32.min_value(), None);
}

#[test]
fn test_with_signedness() {
    assert_eq!(ScalarDType::UInt8.with_signedness(true), ScalarDType::Int8);
    assert_eq!(ScalarDType::Int32.with_signedness(false), ScalarDType::UInt32);
    assert_eq!(ScalarDType::Float32.with_signedness(false), ScalarDType::Float32);
}

#[test]
fn test_pointer_accessors() {
    let ptr = DType::Int8.ptr(AddrSpace::Local);
    assert!(ptr.is_ptr());
    assert_eq!(ptr.base(), ScalarDType::Int8);
    assert_eq!(ptr.addrspace(), Some(AddrSpace::Local));
    assert_eq!(ptr.c_style(), "int8_t*");
    assert_eq!(ptr.clone().ptr(AddrSpace::Global).addrspace(), Some(AddrSpace::Global));
    assert_eq!(ptr.to_string(), "Ptr<Int8, Local>");
}
