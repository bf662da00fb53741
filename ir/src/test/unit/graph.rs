use kiln_dtype::DType;

use crate::{Attribute, ConstantTensor, Error, Graph, Node, TensorInfo};

fn chain() -> Graph {
    Graph::new("chain")
        .input(TensorInfo::new("x", [8], DType::Int8))
        .constant(ConstantTensor::new("w", [8], vec![1; 8]))
        .node(Node::new("add", "Add").inputs(["x", "w"]).outputs(["y"]))
        .node(Node::new("relu", "Relu").inputs(["y"]).outputs(["z"]))
        .tensor("y", [8])
        .tensor("z", [8])
        .output("z")
}

#[test]
fn test_valid_chain() {
    let graph = chain();
    graph.validate().unwrap();
    assert_eq!(graph.shape_of("x"), Some(&[8][..]));
    assert_eq!(graph.shape_of("w"), Some(&[8][..]));
    assert_eq!(graph.shape_of("z"), Some(&[8][..]));
    assert!(graph.is_output("z"));
}

#[test]
fn test_out_of_order_nodes_rejected() {
    let mut graph = chain();
    graph.nodes.swap(0, 1);
    assert_eq!(graph.validate(), Err(Error::NotTopological { node: "relu".into(), tensor: "y".into() }));
}

#[test]
fn test_missing_shape_rejected() {
    let mut graph = chain();
    graph.shapes.remove("y");
    assert!(matches!(graph.validate(), Err(Error::InvalidGraph { .. })));
}

#[test]
fn test_attributes() {
    let node = Node::new("n", "Conv").attr("group", Attribute::Int(1)).attr("mode", Attribute::Str("same".into()));
    assert_eq!(node.int_attr("group"), Some(1));
    assert_eq!(node.str_attr("mode"), Some("same"));
    assert_eq!(node.int_attr("mode"), None);
    assert_eq!(Attribute::Int(3).as_float(), Some(3.0));
}
