use std::{fmt, fs, io, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Graph schema version written into JSON exports and binary artifacts.
pub const SPEC_VERSION: &str = "ttir.v0.1";

fn default_spec_version() -> String {
    SPEC_VERSION.to_string()
}

/// Scalar element types understood by the builder and every lowering target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum DType {
    I1,
    Ui8,
    Si32,
    Ui32,
    Bf16,
    F16,
    F32,
}

impl DType {
    pub fn is_float(self) -> bool {
        matches!(self, DType::Bf16 | DType::F16 | DType::F32)
    }

    /// Textual mnemonic used by the IR dumps (`f32`, `bf16`, `si32`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            DType::I1 => "i1",
            DType::Ui8 => "ui8",
            DType::Si32 => "si32",
            DType::Ui32 => "ui32",
            DType::Bf16 => "bf16",
            DType::F16 => "f16",
            DType::F32 => "f32",
        }
    }

    pub fn from_mnemonic(src: &str) -> Option<Self> {
        let dtype = match src.trim().to_ascii_lowercase().as_str() {
            "i1" => DType::I1,
            "ui8" => DType::Ui8,
            "si32" | "i32" => DType::Si32,
            "ui32" => DType::Ui32,
            "bf16" => DType::Bf16,
            "f16" => DType::F16,
            "f32" => DType::F32,
            _ => return None,
        };
        Some(dtype)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical tensor shape as an ordered list of static extents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the element count, or `None` on overflow.
    pub fn element_count(&self) -> Option<usize> {
        let mut count = 1usize;
        for dim in &self.dims {
            count = count.checked_mul(*dim)?;
        }
        Some(count)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self
            .dims
            .iter()
            .map(|dim| dim.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "({dims})")
    }
}

/// Tensor metadata coupling dtype and shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: impl Into<Shape>) -> Self {
        Self {
            dtype,
            shape: shape.into(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }
}

/// Renders `tensor<1x784xf32>`, the form used by the text dumps.
impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("tensor<")?;
        for dim in self.shape.dims() {
            write!(f, "{dim}x")?;
        }
        write!(f, "{}>", self.dtype)
    }
}

/// Registry-assigned identifier of a value, unique within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Elementwise unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementwiseUnaryOp {
    Relu,
    Exp,
    Log,
    Neg,
    Sqrt,
    Rsqrt,
    Reciprocal,
    Cos,
    Sin,
    Tanh,
    Sigmoid,
    Abs,
}

impl ElementwiseUnaryOp {
    pub const ALL: [ElementwiseUnaryOp; 12] = [
        ElementwiseUnaryOp::Relu,
        ElementwiseUnaryOp::Exp,
        ElementwiseUnaryOp::Log,
        ElementwiseUnaryOp::Neg,
        ElementwiseUnaryOp::Sqrt,
        ElementwiseUnaryOp::Rsqrt,
        ElementwiseUnaryOp::Reciprocal,
        ElementwiseUnaryOp::Cos,
        ElementwiseUnaryOp::Sin,
        ElementwiseUnaryOp::Tanh,
        ElementwiseUnaryOp::Sigmoid,
        ElementwiseUnaryOp::Abs,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            ElementwiseUnaryOp::Relu => "relu",
            ElementwiseUnaryOp::Exp => "exp",
            ElementwiseUnaryOp::Log => "log",
            ElementwiseUnaryOp::Neg => "neg",
            ElementwiseUnaryOp::Sqrt => "sqrt",
            ElementwiseUnaryOp::Rsqrt => "rsqrt",
            ElementwiseUnaryOp::Reciprocal => "reciprocal",
            ElementwiseUnaryOp::Cos => "cos",
            ElementwiseUnaryOp::Sin => "sin",
            ElementwiseUnaryOp::Tanh => "tanh",
            ElementwiseUnaryOp::Sigmoid => "sigmoid",
            ElementwiseUnaryOp::Abs => "abs",
        }
    }
}

/// Elementwise binary operators; operands broadcast against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementwiseBinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Minimum,
}

impl ElementwiseBinaryOp {
    pub const ALL: [ElementwiseBinaryOp; 6] = [
        ElementwiseBinaryOp::Add,
        ElementwiseBinaryOp::Subtract,
        ElementwiseBinaryOp::Multiply,
        ElementwiseBinaryOp::Divide,
        ElementwiseBinaryOp::Maximum,
        ElementwiseBinaryOp::Minimum,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            ElementwiseBinaryOp::Add => "add",
            ElementwiseBinaryOp::Subtract => "subtract",
            ElementwiseBinaryOp::Multiply => "multiply",
            ElementwiseBinaryOp::Divide => "divide",
            ElementwiseBinaryOp::Maximum => "maximum",
            ElementwiseBinaryOp::Minimum => "minimum",
        }
    }
}

/// Reduction families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceKind {
    Sum,
    Max,
    Mean,
}

impl ReduceKind {
    pub fn mnemonic(self) -> &'static str {
        match self {
            ReduceKind::Sum => "sum",
            ReduceKind::Max => "max",
            ReduceKind::Mean => "mean",
        }
    }
}

/// Configuration shared by `sum`, `max` and `mean`. Dims are normalized and sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReduceSpec {
    pub kind: ReduceKind,
    pub dims: Vec<usize>,
    pub keep_dim: bool,
}

/// Declarative form of graph operators. Axis attributes are stored normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Matmul,
    ElementwiseUnary(ElementwiseUnaryOp),
    ElementwiseBinary(ElementwiseBinaryOp),
    Softmax { dimension: usize },
    Reduce(ReduceSpec),
    Reshape { shape: Vec<usize> },
    Transpose { dim0: usize, dim1: usize },
    Permute { perm: Vec<usize> },
    Squeeze { dim: usize },
    Unsqueeze { dim: usize },
    Concat { dim: usize },
    Typecast { dtype: DType },
    Full { shape: Vec<usize>, dtype: DType, fill: f64 },
}

impl Operation {
    /// Operator name without dialect prefix.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Operation::Matmul => "matmul",
            Operation::ElementwiseUnary(op) => op.mnemonic(),
            Operation::ElementwiseBinary(op) => op.mnemonic(),
            Operation::Softmax { .. } => "softmax",
            Operation::Reduce(spec) => spec.kind.mnemonic(),
            Operation::Reshape { .. } => "reshape",
            Operation::Transpose { .. } => "transpose",
            Operation::Permute { .. } => "permute",
            Operation::Squeeze { .. } => "squeeze",
            Operation::Unsqueeze { .. } => "unsqueeze",
            Operation::Concat { .. } => "concat",
            Operation::Typecast { .. } => "typecast",
            Operation::Full { .. } => "full",
        }
    }

    pub fn kind(&self) -> OpKind {
        OpKind::from_op(self)
    }

    /// Number of operands the operator accepts; `None` means variadic.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Operation::Matmul | Operation::ElementwiseBinary(_) => Some(2),
            Operation::Concat { .. } => None,
            Operation::Full { .. } => Some(0),
            _ => Some(1),
        }
    }

    fn fmt_attrs(&self) -> Option<String> {
        let attrs = match self {
            Operation::Softmax { dimension } => format!("dimension = {dimension}"),
            Operation::Reduce(spec) => format!(
                "dims = {}, keep_dim = {}",
                format_list(&spec.dims),
                spec.keep_dim
            ),
            Operation::Reshape { shape } => format!("shape = {}", format_list(shape)),
            Operation::Transpose { dim0, dim1 } => format!("dim0 = {dim0}, dim1 = {dim1}"),
            Operation::Permute { perm } => format!("perm = {}", format_list(perm)),
            Operation::Squeeze { dim } | Operation::Unsqueeze { dim } | Operation::Concat { dim } => {
                format!("dim = {dim}")
            }
            Operation::Typecast { dtype } => format!("dtype = {dtype}"),
            Operation::Full { fill, .. } => format!("fill = {fill:?}"),
            Operation::Matmul
            | Operation::ElementwiseUnary(_)
            | Operation::ElementwiseBinary(_) => return None,
        };
        Some(attrs)
    }
}

/// Hashable operator identity used to key per-target rule tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Matmul,
    Unary(ElementwiseUnaryOp),
    Binary(ElementwiseBinaryOp),
    Softmax,
    Reduce(ReduceKind),
    Reshape,
    Transpose,
    Permute,
    Squeeze,
    Unsqueeze,
    Concat,
    Typecast,
    Full,
}

impl OpKind {
    pub fn from_op(op: &Operation) -> Self {
        match op {
            Operation::Matmul => OpKind::Matmul,
            Operation::ElementwiseUnary(op) => OpKind::Unary(*op),
            Operation::ElementwiseBinary(op) => OpKind::Binary(*op),
            Operation::Softmax { .. } => OpKind::Softmax,
            Operation::Reduce(spec) => OpKind::Reduce(spec.kind),
            Operation::Reshape { .. } => OpKind::Reshape,
            Operation::Transpose { .. } => OpKind::Transpose,
            Operation::Permute { .. } => OpKind::Permute,
            Operation::Squeeze { .. } => OpKind::Squeeze,
            Operation::Unsqueeze { .. } => OpKind::Unsqueeze,
            Operation::Concat { .. } => OpKind::Concat,
            Operation::Typecast { .. } => OpKind::Typecast,
            Operation::Full { .. } => OpKind::Full,
        }
    }
}

/// Declared graph input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphInput {
    pub id: ValueId,
    pub name: String,
    pub spec: TensorSpec,
}

/// One operator application producing exactly one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: ValueId,
    pub op: Operation,
    pub inputs: Vec<ValueId>,
    pub output: TensorSpec,
}

/// Builder-produced dataflow program in the hardware-agnostic `ttir` dialect.
///
/// Nodes are stored in creation order, which is also a valid topological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default = "default_spec_version")]
    pub spec_version: String,
    pub name: String,
    pub inputs: Vec<GraphInput>,
    pub nodes: Vec<Node>,
    pub outputs: Vec<ValueId>,
}

#[derive(Debug, Error)]
pub enum GraphSerdeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("graph spec version '{found}' does not match expected '{expected}'")]
    SpecVersionMismatch {
        found: String,
        expected: &'static str,
    },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            spec_version: SPEC_VERSION.to_string(),
            name: name.into(),
            inputs: Vec::new(),
            nodes: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Looks up the spec of a value declared as an input or produced by a node.
    pub fn value_spec(&self, id: ValueId) -> Option<&TensorSpec> {
        self.inputs
            .iter()
            .find(|input| input.id == id)
            .map(|input| &input.spec)
            .or_else(|| {
                self.nodes
                    .iter()
                    .find(|node| node.id == id)
                    .map(|node| &node.output)
            })
    }

    pub fn input_specs(&self) -> Vec<&TensorSpec> {
        self.inputs.iter().map(|input| &input.spec).collect()
    }

    /// Specs of the declared outputs; unknown ids are skipped.
    pub fn output_specs(&self) -> Vec<&TensorSpec> {
        self.outputs
            .iter()
            .filter_map(|id| self.value_spec(*id))
            .collect()
    }

    pub fn to_json_string(&self) -> Result<String, GraphSerdeError> {
        serde_json::to_string_pretty(self).map_err(GraphSerdeError::from)
    }

    pub fn from_json_str(src: &str) -> Result<Self, GraphSerdeError> {
        let graph: Graph = serde_json::from_str(src)?;
        if graph.spec_version != SPEC_VERSION {
            return Err(GraphSerdeError::SpecVersionMismatch {
                found: graph.spec_version,
                expected: SPEC_VERSION,
            });
        }
        Ok(graph)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), GraphSerdeError> {
        let contents = self.to_json_string()?;
        fs::write(path, contents).map_err(GraphSerdeError::from)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, GraphSerdeError> {
        let contents = fs::read_to_string(path)?;
        Graph::from_json_str(&contents)
    }

    pub fn to_text(&self) -> String {
        format!("{self}")
    }
}

/// Name used for the `index`-th graph output in dumps and artifacts.
pub fn output_name(index: usize) -> String {
    format!("out{index}")
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .inputs
            .iter()
            .map(|input| format!("{}: {} {{name = \"{}\"}}", input.id, input.spec, input.name))
            .collect::<Vec<_>>()
            .join(", ");
        let results = self
            .outputs
            .iter()
            .map(|id| match self.value_spec(*id) {
                Some(spec) => spec.to_string(),
                None => "<unknown>".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "func @{}({params}) -> ({results}) {{", self.name)?;
        for node in &self.nodes {
            let operands = node
                .inputs
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let mut line = format!("  {} = ttir.{}", node.id, node.op.mnemonic());
            if !operands.is_empty() {
                line.push(' ');
                line.push_str(&operands);
            }
            if let Some(attrs) = node.op.fmt_attrs() {
                line.push_str(&format!(" {{{attrs}}}"));
            }
            writeln!(f, "{line} -> {}", node.output)?;
        }
        let returns = self
            .outputs
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "  return {returns}")?;
        writeln!(f, "}}")
    }
}

pub(crate) fn format_list<T: fmt::Display>(values: &[T]) -> String {
    let inner = values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{inner}]")
}
