use kiln_bind::ResolverConfig;
use kiln_dtype::{AddrSpace, DType};
use kiln_ir::{Buffer, FieldValue, Graph, NetworkContext, Node, Scope, StructField, TensorInfo};
use test_case::test_case;

use crate::deploy::declare;
use crate::templates::TemplateRegistry;
use crate::test::helpers::*;
use crate::{DeployConfig, Deployer, Error, Renderer, Stage, generic};

fn deployer(graph: &Graph, config: DeployConfig) -> Deployer<'_> {
    Deployer::new(graph, generic::platform(&config), config).unwrap()
}

#[test]
fn test_narrow_producer_is_revised_for_wide_consumer() {
    let graph = relu_requant();
    let network = deploy(&graph, DeployConfig::default(), vec![]).unwrap();

    assert_eq!(network.report.steps, 4);
    assert_eq!(network.report.backtracks, 1);
    assert_eq!(network.operator("relu").unwrap().binding, "relu_int8_int32");
    assert_eq!(network.operator("requant").unwrap().binding, "requant_shift_int32_int32_int32_int8");
    let order: Vec<_> = network.operators.iter().map(|op| op.name.as_str()).collect();
    assert_eq!(order, ["relu", "requant"]);
}

#[test]
fn test_globals_are_declared_by_storage() {
    let graph = relu_requant();
    let network = deploy(&graph, DeployConfig::default(), vec![]).unwrap();
    assert_eq!(
        network.globals,
        [
            "static const int32_t rq_add[1] = {-2};",
            "static const int32_t rq_mul[1] = {3};",
            "extern int8_t x[32];",
            "extern int8_t y[32];",
            "static int32_t t0[32];",
        ]
    );
}

#[test]
fn test_kernels_render_with_resolved_types() {
    let graph = relu_requant();
    let network = deploy(&graph, DeployConfig::default(), vec![]).unwrap();

    let relu = &network.operator("relu").unwrap().code;
    assert!(relu.starts_with("for (uint32_t i = 0; i < 32; i++) {"));
    assert!(relu.contains("t0[i] = x[i] > 0 ? (int32_t)x[i] : 0;"));

    let requant = &network.operator("requant").unwrap().code;
    assert!(requant.contains("int32_t v = ((int32_t)t0[i] * rq_mul[0] + rq_add[0] + 8) >> 4;"));
    assert!(requant.contains("y[i] = (int8_t)(v < -128 ? -128 : (v > 127 ? 127 : v));"));
}

#[test]
fn test_unit_name_prefixes_identifiers() {
    let graph = relu_requant();
    let network = deploy(&graph, DeployConfig::builder().unit_name("net").build(), vec![]).unwrap();

    assert!(network.globals.contains(&"extern int8_t net_x[32];".to_string()));
    assert!(network.globals.contains(&"static int32_t net_t0[32];".to_string()));
    let relu = &network.operator("relu").unwrap().code;
    assert!(relu.contains("net_t0[i] = net_x[i] > 0 ? (int32_t)net_x[i] : 0;"));
}

#[test]
fn test_network_code_lists_declarations_then_operators() {
    let graph = relu_requant();
    let network = deploy(&graph, DeployConfig::default(), vec![]).unwrap();
    let code = network.code();

    assert!(code.starts_with("static const int32_t rq_add[1] = {-2};\n"));
    let relu = code.find("/* relu */").unwrap();
    let requant = code.find("/* requant */").unwrap();
    assert!(code.find("static int32_t t0[32];").unwrap() < relu);
    assert!(relu < requant);
}

#[test]
fn test_stages_advance_in_order() {
    let graph = relu_requant();
    let mut deployer = deployer(&graph, DeployConfig::default());
    assert_eq!(deployer.stage(), Stage::Created);

    deployer.resolve().unwrap();
    assert_eq!(deployer.stage(), Stage::Resolved);
    assert_eq!(deployer.context().lookup("t0").unwrap().dtype, Some(DType::Int32.ptr(AddrSpace::Local)));
    assert!(deployer.resolver().is_some());

    deployer.bind().unwrap();
    assert_eq!(deployer.stage(), Stage::Bound);
    assert!(!deployer.context().is_frozen());

    deployer.generate().unwrap();
    assert_eq!(deployer.stage(), Stage::Generated);
    assert!(deployer.context().is_frozen());
}

#[test_case(Stage::Created, "bind"; "bind before resolve")]
#[test_case(Stage::Created, "generate"; "generate before resolve")]
#[test_case(Stage::Resolved, "resolve"; "resolve twice")]
#[test_case(Stage::Resolved, "generate"; "generate before bind")]
#[test_case(Stage::Generated, "bind"; "bind after generate")]
fn test_out_of_order_stage(reached: Stage, call: &str) {
    let graph = relu_requant();
    let mut deployer = deployer(&graph, DeployConfig::default());
    let stages = [Stage::Resolved, Stage::Bound, Stage::Generated];
    for stage in stages.into_iter().take_while(|stage| (*stage as u8) <= (reached as u8)) {
        match stage {
            Stage::Resolved => deployer.resolve().map(drop),
            Stage::Bound => deployer.bind(),
            _ => deployer.generate().map(drop),
        }
        .unwrap();
    }

    let err = match call {
        "resolve" => deployer.resolve().map(drop),
        "bind" => deployer.bind(),
        _ => deployer.generate().map(drop),
    }
    .unwrap_err();
    assert!(matches!(err, Error::OutOfOrder { action, stage } if action == call && stage == reached));
    assert_eq!(deployer.stage(), reached);
}

#[test]
fn test_unresolvable_graph() {
    let graph = Graph::new("wide")
        .input(TensorInfo::new("x", [8], DType::Int64))
        .node(Node::new("relu", "Relu").inputs(["x"]).outputs(["y"]))
        .tensor("y", [8])
        .output("y");
    let err = deploy(&graph, DeployConfig::default(), vec![]).unwrap_err();
    assert!(matches!(err, Error::Bind { source: kiln_bind::Error::Unresolvable { .. } }));
}

#[test]
fn test_unmapped_operator() {
    let graph = Graph::new("soft")
        .input(TensorInfo::new("x", [8], DType::Int8))
        .node(Node::new("sm", "Softmax").inputs(["x"]).outputs(["y"]))
        .tensor("y", [8])
        .output("y");
    let err = deploy(&graph, DeployConfig::default(), vec![]).unwrap_err();
    assert!(matches!(err, Error::Bind { source: kiln_bind::Error::UnsupportedOp { .. } }));
}

#[test]
fn test_step_limit_aborts_search() {
    let graph = relu_requant();
    let config = DeployConfig::builder().resolver(ResolverConfig::builder().max_steps(2).build()).build();
    let err = deploy(&graph, config, vec![]).unwrap_err();
    assert!(matches!(err, Error::Bind { source: kiln_bind::Error::StepLimit { limit: 2, .. } }));
}

#[test]
fn test_colliding_identifiers_are_rejected() {
    let graph = Graph::new("clash")
        .input(TensorInfo::new("a.b", [8], DType::Int8))
        .input(TensorInfo::new("a_b", [8], DType::Int8))
        .node(Node::new("add", "Add").inputs(["a.b", "a_b"]).outputs(["y"]))
        .tensor("y", [8])
        .output("y");
    let err = deploy(&graph, DeployConfig::default(), vec![]).unwrap_err();
    assert!(matches!(
        &err,
        Error::Ir { source: kiln_ir::Error::MangleCollision { first, second, ident } }
            if first == "a.b" && second == "a_b" && ident == "a_b"
    ));
}

#[test]
fn test_struct_declaration() {
    let mut ctx = NetworkContext::new("net").with_mangle_prefix("net");
    let weights = Buffer::variable("w.0", [4]).with_dtype(DType::Int8.ptr(AddrSpace::Global));
    ctx.add(weights, Scope::Global).unwrap();
    let fields = vec![
        StructField {
            name: "data".into(),
            dtype: DType::Int8.ptr(AddrSpace::Global),
            value: FieldValue::Buffer("w.0".into()),
        },
        StructField { name: "len".into(), dtype: DType::Int32, value: FieldValue::Int(4) },
    ];
    let args = ctx.hoist_struct("args", fields).unwrap();

    let fragment = declare(&ctx, ctx.lookup(&args).unwrap()).unwrap().unwrap();
    let registry = TemplateRegistry::with_builtins();
    let code = Renderer::new(&registry).render_fragment(&fragment).unwrap();
    assert_eq!(code, "static struct { int8_t* data; int32_t len; } net_args = { (void*)net_w_0, 4 };");
}

#[test]
fn test_tiling_for_unknown_operator() {
    let graph = add(32);
    let err = deploy(&graph, DeployConfig::default(), vec![("ghost", add_tiling(4, 1))]).unwrap_err();
    assert!(matches!(&err, Error::UnknownOperator { operator } if operator == "ghost"));
}

#[test]
fn test_untiled_add() {
    let graph = add(32);
    let network = deploy(&graph, DeployConfig::default(), vec![]).unwrap();
    let code = &network.operator("add").unwrap().code;
    assert!(code.contains("y[i] = (int32_t)a[i] + (int32_t)b[i];"));
    assert!(!code.contains("TILING_I"));
    assert!(network.globals.iter().all(|g| !g.contains("MEMORYARENA")));
}

#[test]
fn test_single_buffered_add() {
    let graph = add(32);
    let network = deploy(&graph, DeployConfig::default(), vec![("add", add_tiling(4, 1))]).unwrap();
    let code = &network.operator("add").unwrap().code;

    assert!(code.contains("for (int TILING_I = 0; TILING_I < 4; TILING_I++) {"));
    assert!(code.contains("for (uint32_t i = 0; i < 64; i++) {"));
    assert!(code.contains("cl_dma_transfer_"));
    assert!(code.contains("CL_DMA_ExternalToLocal"));
    assert!(code.contains("CL_DMA_LocalToExternal"));
    assert!(code.contains("cl_dma_wait("));
    assert!(!code.contains("% 2 == 0"));
    assert!(network.globals.contains(&"static uint8_t MEMORYARENA_L1[384]; /* L1 */".to_string()));
    assert!(network.globals.contains(&"extern int32_t y[256];".to_string()));
}

#[test]
fn test_double_buffered_add() {
    let graph = add(32);
    let network = deploy(&graph, DeployConfig::default(), vec![("add", add_tiling(4, 2))]).unwrap();
    let code = &network.operator("add").unwrap().code;

    assert!(code.contains("for (int TILING_I = 0; TILING_I < 4; TILING_I++) {"));
    assert!(code.contains("if (TILING_I % 2 == 0) {"));
    assert!(code.contains("for (uint32_t i = 0; i < 64; i++) {"));
    assert!(network.globals.contains(&"static uint8_t MEMORYARENA_L1[768]; /* L1 */".to_string()));
}

#[test]
fn test_tile_loop_counter_follows_config() {
    let graph = add(32);
    let config = DeployConfig::builder().tile_index_var("tile").build();
    let network = deploy(&graph, config, vec![("add", add_tiling(4, 1))]).unwrap();
    let code = &network.operator("add").unwrap().code;
    assert!(code.contains("for (int tile = 0; tile < 4; tile++) {"));
    assert!(!code.contains("TILING_I"));
}

#[test]
fn test_matmul_scratch_is_allocated_around_kernel() {
    let graph = matmul();
    let network = deploy(&graph, DeployConfig::default(), vec![]).unwrap();
    let mm = network.operator("mm").unwrap();
    assert_eq!(mm.binding, "matmul_int8_int8_int32");

    let lines: Vec<_> = mm.code.lines().collect();
    let at = |needle: &str| lines.iter().position(|line| line.contains(needle)).unwrap();
    let alloc = at("kiln_alloc_L1(16);");
    let kernel = at("int32_t* acc = (int32_t*)mm_acc;");
    let free = at("kiln_free_L1(mm_acc);");
    assert!(alloc < kernel && kernel < free);

    let weights = "static const int8_t w[12] = {-6, -5, -4, -3, -2, -1, 0, 1, 2, 3, 4, 5};";
    assert!(network.globals.iter().any(|g| g == weights));
    assert!(network.globals.contains(&"extern int32_t y[8];".to_string()));
    assert!(network.globals.iter().all(|g| !g.contains("mm_acc")));
}

#[test]
#[tracing_test::traced_test]
fn test_deploy_logs_stages() {
    let graph = relu_requant();
    deploy(&graph, DeployConfig::default(), vec![]).unwrap();
    assert!(logs_contain("operator transformed"));
    assert!(logs_contain("network generated"));
}
