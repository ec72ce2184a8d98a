//! Binary artifact ("flatbuffer") encoding of lowered graphs.
//!
//! Layout: the 4-byte magic `TTFB`, the format version as a little-endian `u32`, then a bincode
//! payload holding the [`Artifact`]. The header is readable without knowing the payload schema.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ir::{output_name, DType, TensorSpec, ValueId, SPEC_VERSION};
use crate::lower::{Layout, LoweredGraph, LoweredNode, NativeOp, TargetSpec};

pub const ARTIFACT_MAGIC: [u8; 4] = *b"TTFB";
pub const ARTIFACT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8;

static TMP_FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fixed-width little-endian payload encoding.
fn encoding() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("bincode error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("artifact is truncated ({len} bytes)")]
    Truncated { len: usize },
    #[error("bad magic {found:?}, expected \"TTFB\"")]
    BadMagic { found: [u8; 4] },
    #[error("artifact format version {found} is not supported (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("{0} trailing byte(s) after the artifact payload")]
    TrailingBytes(usize),
    #[error("value {0} is referenced but never defined")]
    DanglingReference(ValueId),
}

/// Reference to a tensor by position: a graph input or an earlier node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TensorRef {
    Input(u32),
    Node(u32),
}

impl fmt::Display for TensorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorRef::Input(index) => write!(f, "in[{index}]"),
            TensorRef::Node(index) => write!(f, "node[{index}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Int(i64),
    Ints(Vec<i64>),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(value) => write!(f, "{value}"),
            AttrValue::Ints(values) => write!(f, "{values:?}"),
            AttrValue::Float(value) => write!(f, "{value:?}"),
            AttrValue::Bool(value) => write!(f, "{value}"),
            AttrValue::Str(value) => write!(f, "{value:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDesc {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub layout: Layout,
}

impl TensorDesc {
    pub fn spec(&self) -> TensorSpec {
        TensorSpec::new(self.dtype, self.shape.clone())
    }
}

impl fmt::Display for TensorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} #{}",
            self.name,
            self.spec(),
            self.layout.as_str()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactOp {
    pub op: String,
    pub inputs: Vec<TensorRef>,
    pub attrs: BTreeMap<String, AttrValue>,
    pub output: TensorDesc,
}

/// Decoded artifact: one lowered graph for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_version: u32,
    pub schema: String,
    pub target: TargetSpec,
    pub name: String,
    pub inputs: Vec<TensorDesc>,
    pub outputs: Vec<TensorDesc>,
    /// Value each entry of `outputs` is read from.
    pub results: Vec<TensorRef>,
    pub nodes: Vec<ArtifactOp>,
}

fn ints(values: &[usize]) -> AttrValue {
    AttrValue::Ints(values.iter().map(|&value| value as i64).collect())
}

fn op_attributes(op: &NativeOp) -> BTreeMap<String, AttrValue> {
    let mut attrs = BTreeMap::new();
    let mut put = |key: &str, value: AttrValue| {
        attrs.insert(key.to_string(), value);
    };
    match op {
        NativeOp::Softmax { dimension } => put("dimension", AttrValue::Int(*dimension as i64)),
        NativeOp::Reduce { dims, keep_dim, .. } => {
            put("dims", ints(dims));
            put("keep_dim", AttrValue::Bool(*keep_dim));
        }
        NativeOp::Reshape { shape } => put("shape", ints(shape)),
        NativeOp::Transpose { dim0, dim1 } => {
            put("dim0", AttrValue::Int(*dim0 as i64));
            put("dim1", AttrValue::Int(*dim1 as i64));
        }
        NativeOp::Permute { perm } => put("perm", ints(perm)),
        NativeOp::Concat { dim } => put("dim", AttrValue::Int(*dim as i64)),
        NativeOp::Typecast { dtype } => put("dtype", AttrValue::Str(dtype.as_str().to_string())),
        NativeOp::Full { fill } => put("fill", AttrValue::Float(*fill)),
        NativeOp::ToLayout { layout } => put("layout", AttrValue::Str(layout.as_str().to_string())),
        NativeOp::Matmul | NativeOp::Binary(_) | NativeOp::Unary(_) => {}
    }
    attrs
}

impl Artifact {
    pub fn from_lowered(graph: &LoweredGraph) -> Result<Self, SerializationError> {
        let mut refs = HashMap::new();
        let inputs = graph
            .inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                refs.insert(input.id, (TensorRef::Input(index as u32), Layout::RowMajor));
                TensorDesc {
                    name: input.name.clone(),
                    shape: input.spec.dims().to_vec(),
                    dtype: input.spec.dtype,
                    layout: Layout::RowMajor,
                }
            })
            .collect::<Vec<_>>();

        let resolve = |refs: &HashMap<ValueId, (TensorRef, Layout)>, id: ValueId| {
            refs.get(&id)
                .copied()
                .ok_or(SerializationError::DanglingReference(id))
        };

        let mut nodes = Vec::with_capacity(graph.nodes.len());
        for (index, node) in graph.nodes.iter().enumerate() {
            let LoweredNode {
                id,
                op,
                inputs: operands,
                output,
                layout,
                ..
            } = node;
            let operands = operands
                .iter()
                .map(|operand| resolve(&refs, *operand).map(|(tensor, _)| tensor))
                .collect::<Result<Vec<_>, _>>()?;
            nodes.push(ArtifactOp {
                op: op.mnemonic().to_string(),
                inputs: operands,
                attrs: op_attributes(op),
                output: TensorDesc {
                    name: id.to_string(),
                    shape: output.dims().to_vec(),
                    dtype: output.dtype,
                    layout: *layout,
                },
            });
            refs.insert(*id, (TensorRef::Node(index as u32), *layout));
        }

        let mut outputs = Vec::with_capacity(graph.outputs.len());
        let mut results = Vec::with_capacity(graph.outputs.len());
        for (index, id) in graph.outputs.iter().enumerate() {
            let (tensor, layout) = resolve(&refs, *id)?;
            let spec = graph
                .value_spec(*id)
                .ok_or(SerializationError::DanglingReference(*id))?;
            outputs.push(TensorDesc {
                name: output_name(index),
                shape: spec.dims().to_vec(),
                dtype: spec.dtype,
                layout,
            });
            results.push(tensor);
        }

        Ok(Self {
            artifact_version: ARTIFACT_VERSION,
            schema: SPEC_VERSION.to_string(),
            target: graph.target.clone(),
            name: graph.name.clone(),
            inputs,
            outputs,
            results,
            nodes,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        let payload = encoding().serialize(self)?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(&ARTIFACT_MAGIC);
        bytes.extend_from_slice(&ARTIFACT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        if bytes.len() < HEADER_LEN {
            return Err(SerializationError::Truncated { len: bytes.len() });
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        if magic != ARTIFACT_MAGIC {
            return Err(SerializationError::BadMagic { found: magic });
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[4..HEADER_LEN]);
        let version = u32::from_le_bytes(version);
        if version != ARTIFACT_VERSION {
            return Err(SerializationError::VersionMismatch {
                found: version,
                expected: ARTIFACT_VERSION,
            });
        }

        let payload = &bytes[HEADER_LEN..];
        let mut cursor = Cursor::new(payload);
        // Bounded by the payload so a corrupted length prefix fails instead of allocating.
        let artifact: Artifact = encoding()
            .with_limit(payload.len() as u64)
            .allow_trailing_bytes()
            .deserialize_from(&mut cursor)?;
        let consumed = cursor.position() as usize;
        if consumed != payload.len() {
            return Err(SerializationError::TrailingBytes(payload.len() - consumed));
        }
        if artifact.artifact_version != version {
            return Err(SerializationError::VersionMismatch {
                found: artifact.artifact_version,
                expected: ARTIFACT_VERSION,
            });
        }
        Ok(artifact)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "artifact `{}` (format v{}, schema {}) for {} v{}",
            self.name, self.artifact_version, self.schema, self.target.name, self.target.version
        )?;
        for input in &self.inputs {
            writeln!(f, "  input  {input}")?;
        }
        for (output, result) in self.outputs.iter().zip(&self.results) {
            writeln!(f, "  output {output} <- {result}")?;
        }
        for (index, node) in self.nodes.iter().enumerate() {
            let operands = node
                .inputs
                .iter()
                .map(|operand| operand.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let attrs = node
                .attrs
                .iter()
                .map(|(key, value)| format!("{key} = {value}"))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "  [{index}] {}({operands})", node.op)?;
            if !attrs.is_empty() {
                write!(f, " {{{attrs}}}")?;
            }
            writeln!(f, " -> {}", node.output)?;
        }
        Ok(())
    }
}

/// Encodes `graph` into artifact bytes.
pub fn serialize(graph: &LoweredGraph) -> Result<Vec<u8>, SerializationError> {
    Artifact::from_lowered(graph)?.to_bytes()
}

pub fn deserialize(bytes: &[u8]) -> Result<Artifact, SerializationError> {
    Artifact::from_bytes(bytes)
}

/// Writes the artifact for `graph` to `path`.
///
/// Bytes go to a sibling temporary file first and are renamed into place, so readers see either
/// the previous file or the complete new one.
pub fn write_artifact(graph: &LoweredGraph, path: &Path) -> Result<usize, SerializationError> {
    let bytes = serialize(graph)?;
    write_atomic(path, &bytes)?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote artifact");
    Ok(bytes.len())
}

pub fn read_artifact(path: &Path) -> Result<Artifact, SerializationError> {
    let bytes = fs::read(path).map_err(|source| SerializationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    deserialize(&bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SerializationError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(format!(
        ".tmp{}.{}",
        std::process::id(),
        TMP_FILE_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let tmp = path.with_file_name(tmp_name);

    let result = (|| -> io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    result.map_err(|source| {
        let _ = fs::remove_file(&tmp);
        SerializationError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::lower::{lower, TtnnTarget};

    fn lowered() -> LoweredGraph {
        let mut builder = GraphBuilder::new("tiny");
        let x = builder.input(&[1, 8], DType::F32).unwrap();
        let w = builder.input(&[8, 4], DType::F32).unwrap();
        let y = builder.matmul(x, w).unwrap();
        let z = builder.softmax(y, 1).unwrap();
        let graph = builder.finish(&[z]).unwrap();
        lower(&graph, &TtnnTarget::new()).unwrap()
    }

    #[test]
    fn header_is_magic_then_version() {
        let bytes = serialize(&lowered()).unwrap();
        assert_eq!(&bytes[..4], b"TTFB");
        assert_eq!(&bytes[4..8], &ARTIFACT_VERSION.to_le_bytes());
    }

    #[test]
    fn corrupted_headers_are_rejected() {
        let bytes = serialize(&lowered()).unwrap();

        let mut wrong_magic = bytes.clone();
        wrong_magic[0] = b'X';
        assert!(matches!(
            deserialize(&wrong_magic),
            Err(SerializationError::BadMagic { .. })
        ));

        let mut wrong_version = bytes.clone();
        wrong_version[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            deserialize(&wrong_version),
            Err(SerializationError::VersionMismatch { found: 99, .. })
        ));

        let mut trailing = bytes.clone();
        trailing.extend_from_slice(&[0, 0, 0]);
        assert!(matches!(
            deserialize(&trailing),
            Err(SerializationError::TrailingBytes(3))
        ));

        assert!(matches!(
            deserialize(&bytes[..6]),
            Err(SerializationError::Truncated { len: 6 })
        ));
        assert!(deserialize(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn node_references_point_backwards() {
        let artifact = deserialize(&serialize(&lowered()).unwrap()).unwrap();
        for (index, node) in artifact.nodes.iter().enumerate() {
            for operand in &node.inputs {
                match operand {
                    TensorRef::Input(input) => assert!((*input as usize) < artifact.inputs.len()),
                    TensorRef::Node(node) => assert!((*node as usize) < index),
                }
            }
        }
        assert_eq!(artifact.outputs[0].name, "out0");
        assert_eq!(artifact.outputs[0].layout, Layout::RowMajor);
    }

    #[test]
    fn oversized_length_prefix_is_an_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&ARTIFACT_MAGIC);
        bytes.extend_from_slice(&ARTIFACT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&ARTIFACT_VERSION.to_le_bytes());
        // schema string claims ~9 EB
        bytes.extend_from_slice(&(u64::MAX / 2).to_le_bytes());
        bytes.extend_from_slice(b"ttir");
        assert!(matches!(
            deserialize(&bytes),
            Err(SerializationError::Codec(_))
        ));

        // same for a node list whose length prefix lies
        let mut valid = serialize(&lowered()).unwrap();
        let len = valid.len();
        valid.truncate(len / 2);
        assert!(deserialize(&valid).is_err());
    }

    #[test]
    fn concurrent_writes_to_one_path_do_not_collide() {
        let dir = std::env::temp_dir().join(format!(
            "ttir_rs_atomic_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("shared.ttb");
        let graph = lowered();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| write_artifact(&graph, &path).unwrap());
            }
        });
        assert_eq!(read_artifact(&path).unwrap().name, "tiny");
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
        fs::remove_dir_all(&dir).unwrap();
    }
}
