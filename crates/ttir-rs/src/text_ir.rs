//! Parser for the textual `ttir` dumps produced by [`Graph`]'s `Display` impl.
//!
//! Parsing happens inside a [`ParseContext`] that holds the registered dialects. Every op is
//! rebuilt through [`GraphBuilder`], so the declared result types are checked against inference.
//!
//! ```text
//! func @mnist(%0: tensor<1x784xf32> {name = "in0"}, %1: tensor<784x256xf32>) -> (tensor<1x256xf32>) {
//!   %2 = ttir.matmul %0, %1 -> tensor<1x256xf32>
//!   return %2
//! }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::builder::GraphBuilder;
use crate::error::BuildError;
use crate::ir::{
    DType, ElementwiseBinaryOp, ElementwiseUnaryOp, Graph, Operand, Operation, ReduceKind,
    ReduceSpec, TensorSpec,
};

/// Dialects the parser knows how to rebuild.
pub const KNOWN_DIALECTS: &[&str] = &["ttir"];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: dialect `{dialect}` is not registered")]
    UnknownDialect { line: usize, dialect: String },
    #[error("line {line}: {source}")]
    Build {
        line: usize,
        #[source]
        source: BuildError,
    },
    #[error("failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },
}

fn syntax(line: usize, message: impl Into<String>) -> ParseError {
    ParseError::Syntax {
        line,
        message: message.into(),
    }
}

/// Parsed module. Owns its graph; nothing borrows the context it was parsed in.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub graph: Graph,
    pub dialects: Vec<String>,
}

/// Scoped parsing context with a set of registered dialects.
#[derive(Debug, Default)]
pub struct ParseContext {
    dialects: BTreeSet<String>,
}

impl ParseContext {
    pub fn new() -> Self {
        tracing::trace!("acquired parse context");
        Self::default()
    }

    pub fn register_dialect(&mut self, name: &str) -> Result<(), ParseError> {
        if !KNOWN_DIALECTS.contains(&name) {
            return Err(ParseError::UnknownDialect {
                line: 0,
                dialect: name.to_string(),
            });
        }
        self.dialects.insert(name.to_string());
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.dialects.contains(name)
    }

    pub fn parse(&self, src: &str) -> Result<Module, ParseError> {
        let graph = Parser::new(self, src).parse()?;
        Ok(Module {
            graph,
            dialects: self.dialects.iter().cloned().collect(),
        })
    }
}

impl Drop for ParseContext {
    fn drop(&mut self) {
        tracing::trace!(dialects = self.dialects.len(), "released parse context");
    }
}

/// Parses `src` in a fresh context with `dialects` registered. The context is released on return.
pub fn parse_module(src: &str, dialects: &[&str]) -> Result<Module, ParseError> {
    let mut context = ParseContext::new();
    for dialect in dialects {
        context.register_dialect(dialect)?;
    }
    context.parse(src)
}

pub fn parse_module_file(path: &Path, dialects: &[&str]) -> Result<Module, ParseError> {
    let src = fs::read_to_string(path).map_err(|err| ParseError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    parse_module(&src, dialects)
}

struct Parser<'a> {
    context: &'a ParseContext,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn new(context: &'a ParseContext, source: &'a str) -> Self {
        Self { context, source }
    }

    fn parse(&self) -> Result<Graph, ParseError> {
        let mut lines = self
            .source
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with("//"));

        let (header_line, header) = lines
            .next()
            .ok_or_else(|| syntax(0, "input is empty"))?;
        let (name, params, result_types) = parse_header(header_line, header)?;

        let mut builder = GraphBuilder::new(name);
        let mut values: HashMap<String, Operand> = HashMap::new();
        for (index, param) in params.iter().enumerate() {
            let input_name = param
                .input_name
                .clone()
                .unwrap_or_else(|| format!("in{index}"));
            let operand = builder
                .named_input(input_name, param.spec.dims(), param.spec.dtype)
                .map_err(|source| ParseError::Build {
                    line: header_line,
                    source,
                })?;
            if values.insert(param.value.clone(), operand).is_some() {
                return Err(syntax(
                    header_line,
                    format!("value `{}` is declared twice", param.value),
                ));
            }
        }

        let mut returned = None;
        let mut closed = false;
        for (line_no, line) in lines {
            if closed {
                return Err(syntax(line_no, "unexpected text after end of function"));
            }
            if line == "}" {
                closed = true;
                continue;
            }
            if returned.is_some() {
                return Err(syntax(line_no, "`return` must be the last statement"));
            }
            if let Some(rest) = line.strip_prefix("return") {
                let operands = split_top_level(rest, ',')
                    .into_iter()
                    .map(|value| lookup(&values, line_no, value))
                    .collect::<Result<Vec<_>, _>>()?;
                returned = Some((line_no, operands));
                continue;
            }
            let (result, operand) = self.parse_statement(line_no, line, &mut builder, &values)?;
            if values.insert(result.clone(), operand).is_some() {
                return Err(syntax(line_no, format!("value `{result}` is defined twice")));
            }
        }
        if !closed {
            return Err(syntax(0, "missing `}` to end function body"));
        }
        let (return_line, outputs) =
            returned.ok_or_else(|| syntax(0, "function has no `return`"))?;
        if outputs.len() != result_types.len() {
            return Err(syntax(
                return_line,
                format!(
                    "returns {} value(s) but the signature declares {}",
                    outputs.len(),
                    result_types.len()
                ),
            ));
        }
        for (operand, declared) in outputs.iter().zip(&result_types) {
            let actual = builder.spec(operand).map_err(|source| ParseError::Build {
                line: return_line,
                source,
            })?;
            if actual != declared {
                return Err(syntax(
                    return_line,
                    format!("returned {actual} but the signature declares {declared}"),
                ));
            }
        }
        builder
            .finish(&outputs)
            .map_err(|source| ParseError::Build {
                line: return_line,
                source,
            })
    }

    fn parse_statement(
        &self,
        line_no: usize,
        line: &str,
        builder: &mut GraphBuilder,
        values: &HashMap<String, Operand>,
    ) -> Result<(String, Operand), ParseError> {
        let (lhs, rhs) = line
            .split_once('=')
            .ok_or_else(|| syntax(line_no, format!("expected `%value = op ...`, got `{line}`")))?;
        let result = lhs.trim();
        if !result.starts_with('%') {
            return Err(syntax(line_no, format!("invalid result name `{result}`")));
        }
        let (body, declared) = rhs
            .rsplit_once("->")
            .ok_or_else(|| syntax(line_no, "missing `-> type` after operation"))?;
        let declared = parse_type(line_no, declared)?;

        let body = body.trim();
        let (op_name, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
        let (dialect, mnemonic) = op_name
            .split_once('.')
            .ok_or_else(|| syntax(line_no, format!("operation `{op_name}` has no dialect prefix")))?;
        if !self.context.is_registered(dialect) {
            return Err(ParseError::UnknownDialect {
                line: line_no,
                dialect: dialect.to_string(),
            });
        }

        let rest = rest.trim();
        let (operand_text, attrs) = match rest.find('{') {
            Some(open) => {
                let close = rest
                    .rfind('}')
                    .filter(|close| *close > open)
                    .ok_or_else(|| syntax(line_no, "unterminated attribute dictionary"))?;
                (&rest[..open], parse_attributes(line_no, &rest[open + 1..close])?)
            }
            None => (rest, HashMap::new()),
        };
        let operands = split_top_level(operand_text, ',')
            .into_iter()
            .map(|value| lookup(values, line_no, value))
            .collect::<Result<Vec<_>, _>>()?;

        let op = build_operation(line_no, mnemonic, &attrs, &declared)?;
        let operand = builder
            .append(op, &operands)
            .map_err(|source| ParseError::Build {
                line: line_no,
                source,
            })?;
        let inferred = builder.spec(&operand).map_err(|source| ParseError::Build {
            line: line_no,
            source,
        })?;
        if *inferred != declared {
            return Err(syntax(
                line_no,
                format!("declared type {declared} does not match inferred {inferred}"),
            ));
        }
        Ok((result.to_string(), operand))
    }
}

struct Param {
    value: String,
    spec: TensorSpec,
    input_name: Option<String>,
}

fn parse_header(line: usize, header: &str) -> Result<(String, Vec<Param>, Vec<TensorSpec>), ParseError> {
    let rest = header
        .strip_prefix("func")
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix('@'))
        .ok_or_else(|| syntax(line, "expected `func @name(...)`"))?;
    let open = rest
        .find('(')
        .ok_or_else(|| syntax(line, "missing `(` after function name"))?;
    let name = rest[..open].trim().to_string();
    if name.is_empty() {
        return Err(syntax(line, "function name is empty"));
    }
    let close = find_matching_paren(rest, open)
        .ok_or_else(|| syntax(line, "unbalanced parameter list"))?;
    let params = split_top_level(&rest[open + 1..close], ',')
        .into_iter()
        .map(|param| parse_param(line, param))
        .collect::<Result<Vec<_>, _>>()?;

    let tail = rest[close + 1..].trim();
    let tail = tail
        .strip_suffix('{')
        .ok_or_else(|| syntax(line, "missing `{` to start function body"))?
        .trim();
    let results = tail
        .strip_prefix("->")
        .ok_or_else(|| syntax(line, "missing `->` result list"))?
        .trim();
    let results = results
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(results);
    let result_types = split_top_level(results, ',')
        .into_iter()
        .map(|ty| parse_type(line, ty))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((name, params, result_types))
}

fn parse_param(line: usize, src: &str) -> Result<Param, ParseError> {
    let (value, rest) = src
        .split_once(':')
        .ok_or_else(|| syntax(line, format!("parameter `{src}` has no type")))?;
    let value = value.trim();
    if !value.starts_with('%') {
        return Err(syntax(line, format!("invalid parameter name `{value}`")));
    }
    let rest = rest.trim();
    let (ty, input_name) = match rest.find('{') {
        Some(open) => {
            let close = rest
                .rfind('}')
                .filter(|close| *close > open)
                .ok_or_else(|| syntax(line, "unterminated parameter attributes"))?;
            let attrs = parse_attributes(line, &rest[open + 1..close])?;
            let name = attrs
                .get("name")
                .map(|name| parse_string(line, name))
                .transpose()?;
            (&rest[..open], name)
        }
        None => (rest, None),
    };
    Ok(Param {
        value: value.to_string(),
        spec: parse_type(line, ty)?,
        input_name,
    })
}

fn lookup(values: &HashMap<String, Operand>, line: usize, name: &str) -> Result<Operand, ParseError> {
    values
        .get(name.trim())
        .copied()
        .ok_or_else(|| syntax(line, format!("use of undefined value `{}`", name.trim())))
}

fn find_matching_paren(src: &str, open_index: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, ch) in src[open_index..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open_index + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits on `delimiter` outside of `<>`, `[]`, `()` and `{}` nesting and string literals.
fn split_top_level(input: &str, delimiter: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut start = 0usize;
    for (idx, ch) in input.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            _ if in_string => {}
            '<' | '[' | '(' | '{' => depth += 1,
            '>' | ']' | ')' | '}' => depth = depth.saturating_sub(1),
            c if c == delimiter && depth == 0 => {
                pieces.push(input[start..idx].trim());
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    let last = input[start..].trim();
    if !last.is_empty() || !pieces.is_empty() {
        pieces.push(last);
    }
    pieces
}

fn parse_type(line: usize, src: &str) -> Result<TensorSpec, ParseError> {
    let trimmed = src.trim();
    let body = trimmed
        .strip_prefix("tensor<")
        .and_then(|rest| rest.strip_suffix('>'))
        .ok_or_else(|| syntax(line, format!("unsupported type `{trimmed}`")))?;
    let mut parts = body.split('x').map(str::trim).collect::<Vec<_>>();
    let dtype_text = parts
        .pop()
        .ok_or_else(|| syntax(line, "tensor type must specify a dtype"))?;
    let dtype = DType::from_mnemonic(dtype_text)
        .ok_or_else(|| syntax(line, format!("unsupported dtype `{dtype_text}`")))?;
    let dims = parts
        .into_iter()
        .map(|dim| {
            dim.parse::<usize>()
                .map_err(|_| syntax(line, format!("invalid dimension `{dim}`")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TensorSpec::new(dtype, dims))
}

fn parse_attributes(line: usize, src: &str) -> Result<HashMap<String, String>, ParseError> {
    split_top_level(src, ',')
        .into_iter()
        .map(|entry| {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| syntax(line, format!("attribute `{entry}` has no value")))?;
            Ok((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn parse_string(line: usize, value: &str) -> Result<String, ParseError> {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .map(str::to_string)
        .ok_or_else(|| syntax(line, format!("expected a quoted string, got `{value}`")))
}

fn parse_usize(line: usize, key: &str, value: &str) -> Result<usize, ParseError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| syntax(line, format!("attribute `{key}` expects an integer, got `{value}`")))
}

fn parse_usize_list(line: usize, key: &str, value: &str) -> Result<Vec<usize>, ParseError> {
    let inner = value
        .trim()
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .ok_or_else(|| syntax(line, format!("attribute `{key}` expects a list, got `{value}`")))?;
    split_top_level(inner, ',')
        .into_iter()
        .map(|item| parse_usize(line, key, item))
        .collect()
}

fn parse_bool(line: usize, key: &str, value: &str) -> Result<bool, ParseError> {
    match value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(syntax(
            line,
            format!("attribute `{key}` expects a bool, got `{other}`"),
        )),
    }
}

fn build_operation(
    line: usize,
    mnemonic: &str,
    attrs: &HashMap<String, String>,
    declared: &TensorSpec,
) -> Result<Operation, ParseError> {
    let attr = |key: &str| {
        attrs
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| syntax(line, format!("`{mnemonic}` requires attribute `{key}`")))
    };
    let usize_attr = |key: &str| attr(key).and_then(|value| parse_usize(line, key, value));
    let list_attr = |key: &str| attr(key).and_then(|value| parse_usize_list(line, key, value));

    if let Some(op) = ElementwiseUnaryOp::ALL
        .into_iter()
        .find(|op| op.mnemonic() == mnemonic)
    {
        return Ok(Operation::ElementwiseUnary(op));
    }
    if let Some(op) = ElementwiseBinaryOp::ALL
        .into_iter()
        .find(|op| op.mnemonic() == mnemonic)
    {
        return Ok(Operation::ElementwiseBinary(op));
    }
    let reduce = |kind| -> Result<Operation, ParseError> {
        let keep_dim = attr("keep_dim").and_then(|value| parse_bool(line, "keep_dim", value))?;
        Ok(Operation::Reduce(ReduceSpec {
            kind,
            dims: list_attr("dims")?,
            keep_dim,
        }))
    };
    let op = match mnemonic {
        "matmul" => Operation::Matmul,
        "softmax" => Operation::Softmax {
            dimension: usize_attr("dimension")?,
        },
        "sum" => reduce(ReduceKind::Sum)?,
        "max" => reduce(ReduceKind::Max)?,
        "mean" => reduce(ReduceKind::Mean)?,
        "reshape" => Operation::Reshape {
            shape: list_attr("shape")?,
        },
        "transpose" => Operation::Transpose {
            dim0: usize_attr("dim0")?,
            dim1: usize_attr("dim1")?,
        },
        "permute" => Operation::Permute {
            perm: list_attr("perm")?,
        },
        "squeeze" => Operation::Squeeze {
            dim: usize_attr("dim")?,
        },
        "unsqueeze" => Operation::Unsqueeze {
            dim: usize_attr("dim")?,
        },
        "concat" => Operation::Concat {
            dim: usize_attr("dim")?,
        },
        "typecast" => {
            let value = attr("dtype")?;
            let dtype = DType::from_mnemonic(value)
                .ok_or_else(|| syntax(line, format!("unsupported dtype `{value}`")))?;
            Operation::Typecast { dtype }
        }
        "full" => {
            let value = attr("fill")?;
            let fill = value
                .parse::<f64>()
                .map_err(|_| syntax(line, format!("invalid fill value `{value}`")))?;
            Operation::Full {
                shape: declared.dims().to_vec(),
                dtype: declared.dtype,
                fill,
            }
        }
        other => return Err(syntax(line, format!("unknown operation `{other}`"))),
    };
    Ok(op)
}
