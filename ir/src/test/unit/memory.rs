use std::collections::BTreeMap;

use crate::{
    Error, HyperRectangle, MemoryConstraint, MemoryHierarchy, MemoryLevel, NodeMemoryConstraint, OperatorTiling,
    TilingSchedule,
};

fn hierarchy() -> MemoryHierarchy {
    MemoryHierarchy::new(
        vec![
            MemoryLevel::new("L3", 1 << 24, ["L2"]),
            MemoryLevel::new("L2", 1 << 19, ["L3", "L1"]),
            MemoryLevel::new("L1", 1 << 16, ["L2"]),
        ],
        "L2",
    )
    .unwrap()
}

fn step(tensor: &str, offset: [usize; 2], dims: [usize; 2]) -> BTreeMap<String, HyperRectangle> {
    BTreeMap::from([(tensor.to_string(), HyperRectangle::new(offset, dims).unwrap())])
}

#[test]
fn test_hierarchy_adjacency() {
    let hierarchy = hierarchy();
    assert!(hierarchy.is_adjacent("L2", "L1"));
    assert!(hierarchy.is_adjacent("L1", "L2"));
    assert!(!hierarchy.is_adjacent("L3", "L1"));
    assert!(hierarchy.is_innermost("L1"));
    assert_eq!(hierarchy.default_level(), "L2");
}

#[test]
fn test_linear_hierarchy() {
    let linear = MemoryHierarchy::linear(&[("L3", 1 << 24), ("L2", 1 << 19), ("L1", 1 << 16)]);
    assert_eq!(linear.level("L2").unwrap().neighbours, ["L3", "L1"]);
    assert!(linear.is_adjacent("L3", "L2"));
    assert!(!linear.is_adjacent("L3", "L1"));
    assert!(linear.is_innermost("L1"));
    assert_eq!(linear.default_level(), "L3");
}

#[test]
fn test_hierarchy_rejects_unknown_neighbour() {
    let result = MemoryHierarchy::new(vec![MemoryLevel::new("L2", 1024, ["L9"])], "L2");
    assert_eq!(result, Err(Error::UnknownMemoryLevel { level: "L9".into() }));
}

#[test]
fn test_memory_constraint_slices() {
    let constraint = MemoryConstraint::new("x", "L1", 128..256, [8, 8], 2).unwrap();
    assert_eq!(constraint.size(), 128);
    assert_eq!(constraint.slice_size(), 64);
    assert_eq!(constraint.slice_offset(1), 192);
    constraint.check_tile("x", 64).unwrap();
    assert!(constraint.check_tile("x", 65).is_err());
}

#[test]
fn test_memory_constraint_validation() {
    assert!(MemoryConstraint::new("x", "L1", 0..64, [8], 3).is_err());
    assert!(MemoryConstraint::new("x", "L1", 0..63, [8], 2).is_err());
}

#[test]
fn test_node_constraint_lookup() {
    let placement = MemoryConstraint::new("x", "L1", 0..64, [8], 1).unwrap();
    let constraint = NodeMemoryConstraint::default().with("x", placement);
    assert!(constraint.get("x", "L1").is_ok());
    assert!(constraint.get("x", "L2").is_err());
    assert!(constraint.get("y", "L1").is_err());
}

#[test]
fn test_rectangle_rank_mismatch() {
    assert!(matches!(HyperRectangle::new([0, 0], [4]), Err(Error::RankMismatch { .. })));
}

#[test]
fn test_schedule_per_tensor_views() {
    let schedule = TilingSchedule::new(
        vec![step("x", [0, 0], [8, 8]), step("x", [8, 0], [8, 8])],
        vec![step("y", [0, 0], [8, 8]), step("y", [8, 0], [8, 8])],
    )
    .unwrap();
    assert_eq!(schedule.num_tiles(), 2);
    assert_eq!(schedule.inputs()["x"].len(), 2);
    assert_eq!(schedule.outputs()["y"][1].offset.as_slice(), &[8, 0]);
}

#[test]
fn test_schedule_rejects_rank_change() {
    let mut second = BTreeMap::new();
    second.insert("x".to_string(), HyperRectangle::new([0], [8]).unwrap());
    let result = TilingSchedule::new(vec![step("x", [0, 0], [8, 8]), second], vec![]);
    assert!(matches!(result, Err(Error::RankMismatch { .. })));
}

#[test]
fn test_replacement_length_checked() {
    let schedule = TilingSchedule::new(vec![step("x", [0, 0], [8, 8])], vec![]).unwrap();
    let tiling = OperatorTiling::new(schedule, NodeMemoryConstraint::default());
    assert!(tiling.clone().with_replacement("rows", vec![8]).is_ok());
    assert!(tiling.with_replacement("rows", vec![8, 8]).is_err());
}
