//! Kernel templates of the generic operators.

use kiln_bind::{NodeTemplate, NodeTypeChecker, OutputRule, TransientSize, TransientSpec};
use kiln_dtype::ScalarDType::{self, *};
use kiln_ir::TemplateId;

const ADD: &str = "\
for (uint32_t i = 0; i < ${size}; i++) {
    ${data_out}[i] = (${data_out_type})${data_in_0}[i] + (${data_out_type})${data_in_1}[i];
}";

const RELU: &str = "\
for (uint32_t i = 0; i < ${size}; i++) {
    ${data_out}[i] = ${data_in}[i] > 0 ? (${data_out_type})${data_in}[i] : 0;
}";

const MATMUL: &str = "\
for (uint32_t m = 0; m < ${M}; m++) {
    int32_t* acc = (int32_t*)${acc};
    for (uint32_t n = 0; n < ${N}; n++) acc[n] = 0;
    for (uint32_t k = 0; k < ${K}; k++) {
        for (uint32_t n = 0; n < ${N}; n++) acc[n] += (int32_t)${A}[m * ${K} + k] * (int32_t)${B}[k * ${N} + n];
    }
    for (uint32_t n = 0; n < ${N}; n++) ${data_out}[m * ${N} + n] = (${data_out_type})acc[n];
}";

const REQUANT_SHIFT: &str = "\
for (uint32_t i = 0; i < ${size}; i++) {
    int32_t v = ((int32_t)${data_in}[i] * ${mul}[0] + ${add}[0] + ${round}) >> ${log2d};
    ${data_out}[i] = (${data_out_type})(v < ${min} ? ${min} : (v > ${max} ? ${max} : v));
}";

/// One binding's kernel: its id, source and type signature.
#[derive(Debug, Clone)]
pub struct Kernel {
    pub id: TemplateId,
    pub source: &'static str,
    pub checker: NodeTypeChecker,
    pub transients: Vec<TransientSpec>,
}

impl Kernel {
    fn new(
        op: &str,
        source: &'static str,
        inputs: impl IntoIterator<Item = ScalarDType>,
        outputs: impl IntoIterator<Item = ScalarDType>,
    ) -> Self {
        let checker = NodeTypeChecker::new(inputs, outputs);
        let signature: Vec<_> = checker.inputs().iter().chain(checker.outputs()).map(|d| d.to_string()).collect();
        let id = TemplateId::owned(format!("{op}_{}", signature.join("_").to_lowercase()));
        Self { id, source, checker, transients: Vec::new() }
    }

    fn with_rule(mut self, rule: OutputRule) -> Self {
        self.checker = self.checker.with_rule(rule);
        self
    }

    fn with_transient(mut self, transient: TransientSpec) -> Self {
        self.transients.push(transient);
        self
    }

    pub fn template(&self) -> NodeTemplate {
        self.transients.iter().cloned().fold(NodeTemplate::new(self.id.clone()), NodeTemplate::with_transient)
    }
}

pub fn add() -> Vec<Kernel> {
    vec![
        Kernel::new("add", ADD, [Int8, Int8], [Int32]),
        Kernel::new("add", ADD, [Int16, Int16], [Int32]),
        Kernel::new("add", ADD, [Int32, Int32], [Int32]),
    ]
}

/// The widening variant follows the narrow one so that a narrow consumer is preferred.
pub fn relu() -> Vec<Kernel> {
    vec![
        Kernel::new("relu", RELU, [Int8], [Int8]),
        Kernel::new("relu", RELU, [Int8], [Int32]),
        Kernel::new("relu", RELU, [Int16], [Int16]),
        Kernel::new("relu", RELU, [Int32], [Int32]),
    ]
}

/// Each kernel accumulates one output row in a scratch buffer of `N` words.
pub fn matmul(scratch_level: &str) -> Vec<Kernel> {
    let acc =
        TransientSpec::new("acc", TransientSize::PerElement { var: "N".into(), bytes: 4 }).with_level(scratch_level);
    vec![
        Kernel::new("matmul", MATMUL, [Int8, Int8], [Int32]).with_transient(acc.clone()),
        Kernel::new("matmul", MATMUL, [Int16, Int16], [Int32]).with_transient(acc),
    ]
}

/// Output signedness follows the input's quantization.
pub fn requant_shift() -> Vec<Kernel> {
    vec![
        Kernel::new("requant_shift", REQUANT_SHIFT, [Int32, Int32, Int32], [Int8])
            .with_rule(OutputRule::SignPropagating),
        Kernel::new("requant_shift", REQUANT_SHIFT, [Int16, Int32, Int32], [Int8])
            .with_rule(OutputRule::SignPropagating),
    ]
}
