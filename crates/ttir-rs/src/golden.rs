//! Golden model cases compiled by the `ttir-rs` runner.
//!
//! Cases register themselves into [`MODEL_CASES`]; the runner discovers every entry whose name
//! starts with `test_`.

use crate::builder::GraphBuilder;
use crate::error::BuildError;
use crate::ir::Operand;

pub type BuildFn = fn(&mut GraphBuilder, &[Operand]) -> Result<Vec<Operand>, BuildError>;

/// One compilation unit: input shapes, the targets to compile for and the graph body.
pub struct ModelCase {
    pub name: &'static str,
    pub inputs: &'static [&'static [usize]],
    pub targets: &'static [&'static str],
    /// Emit text dumps of every IR stage next to the artifacts.
    pub module_dump: bool,
    pub build: BuildFn,
}

impl std::fmt::Debug for ModelCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCase")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("targets", &self.targets)
            .field("module_dump", &self.module_dump)
            .finish_non_exhaustive()
    }
}

#[linkme::distributed_slice]
pub static MODEL_CASES: [ModelCase] = [..];

/// Registered cases sorted by name.
pub fn all_cases() -> Vec<&'static ModelCase> {
    let mut cases = MODEL_CASES.iter().collect::<Vec<_>>();
    cases.sort_by_key(|case| case.name);
    cases
}

pub fn find_case(name: &str) -> Option<&'static ModelCase> {
    MODEL_CASES.iter().find(|case| case.name == name)
}

#[linkme::distributed_slice(MODEL_CASES)]
static TEST_MNIST: ModelCase = ModelCase {
    name: "test_mnist",
    inputs: &[&[1, 784], &[784, 256], &[1, 256], &[256, 10], &[1, 10]],
    targets: &["ttnn", "ttmetal"],
    module_dump: false,
    build: mnist,
};

/// Two-layer perceptron over a flattened 28x28 image.
fn mnist(b: &mut GraphBuilder, args: &[Operand]) -> Result<Vec<Operand>, BuildError> {
    let &[image, w1, b1, w2, b2] = args else {
        return Err(BuildError::Arity {
            op: "test_mnist",
            expected: 5,
            found: args.len(),
        });
    };
    let hidden = b.matmul(image, w1)?;
    let hidden = b.add(hidden, b1)?;
    let hidden = b.relu(hidden)?;
    let logits = b.matmul(hidden, w2)?;
    let logits = b.add(logits, b2)?;
    Ok(vec![b.softmax(logits, 1)?])
}

#[linkme::distributed_slice(MODEL_CASES)]
static TEST_LLAMA_ATTENTION: ModelCase = ModelCase {
    name: "test_llama_attention",
    inputs: &[
        &[1, 12, 3200],
        &[1, 1, 12, 12],
        &[1, 12],
        &[1, 50, 1],
        &[1, 32, 50, 100],
        &[1, 1],
        &[1, 32, 50, 100],
        &[1, 32, 50, 100],
        &[1, 1],
        &[1, 32, 50, 100],
        &[1, 1],
        &[3200, 3200],
        &[3200, 3200],
        &[3200, 3200],
        &[3200, 3200],
    ],
    targets: &["ttnn", "ttmetal"],
    module_dump: true,
    build: llama_attention,
};

/// Rotary-embedded self-attention block of a 32-head llama layer over 12 tokens.
fn llama_attention(b: &mut GraphBuilder, args: &[Operand]) -> Result<Vec<Operand>, BuildError> {
    let &[hidden, mask, positions, inv_freq, q_rot, q_scale, q_rot_t, k_rot, k_scale, k_rot_t, attn_scale, wq, wk, wv, wo] =
        args
    else {
        return Err(BuildError::Arity {
            op: "test_llama_attention",
            expected: 15,
            found: args.len(),
        });
    };

    let tokens = b.squeeze(hidden, 0)?;

    // rotary tables: cos/sin over concatenated frequencies, shape (1, 1, 12, 100)
    let positions = b.unsqueeze(positions, 1)?;
    let freqs = b.matmul(inv_freq, positions)?;
    let freqs = b.transpose(freqs, -2, -1)?;
    let freqs = b.concat(&[freqs, freqs], -1)?;
    let cos = b.cos(freqs)?;
    let cos = b.unsqueeze(cos, 1)?;
    let sin = b.sin(freqs)?;
    let sin = b.unsqueeze(sin, 1)?;

    let query = project_heads(b, tokens, wq)?;
    let query = rotate(b, query, cos, sin, [q_rot, q_scale, q_rot_t])?;
    let query = b.squeeze(query, 0)?;

    let key = project_heads(b, tokens, wk)?;
    let key = rotate(b, key, cos, sin, [k_rot, k_scale, k_rot_t])?;
    let key = b.squeeze(key, 0)?;
    let key = b.transpose(key, -2, -1)?;

    let scores = b.matmul(query, key)?;
    let scores = b.unsqueeze(scores, 0)?;
    let scores = b.multiply(scores, attn_scale)?;
    let scores = b.add(scores, mask)?;
    let probs = b.softmax(scores, -1)?;
    let probs = b.squeeze(probs, 0)?;

    let value = project_heads(b, tokens, wv)?;
    let value = b.transpose(value, -2, -1)?;
    let value = b.squeeze(value, 0)?;
    let value = b.transpose(value, -2, -1)?;

    let context = b.matmul(probs, value)?;
    let context = b.unsqueeze(context, 0)?;
    let context = b.transpose(context, -3, -2)?;
    let context = b.reshape(context, &[12, 3200])?;
    let out = b.matmul(context, wo)?;
    Ok(vec![b.unsqueeze(out, 0)?])
}

/// `(12, 3200) x (3200, 3200)` split into heads: `(1, 32, 12, 100)`.
fn project_heads(
    b: &mut GraphBuilder,
    tokens: Operand,
    weight: Operand,
) -> Result<Operand, BuildError> {
    let projected = b.matmul(tokens, weight)?;
    let heads = b.reshape(projected, &[1, 12, 32, 100])?;
    b.transpose(heads, -3, -2)
}

/// Applies the rotary embedding `x * cos + rotate_half(x) * sin`.
fn rotate(
    b: &mut GraphBuilder,
    x: Operand,
    cos: Operand,
    sin: Operand,
    [rot, scale, rot_t]: [Operand; 3],
) -> Result<Operand, BuildError> {
    let direct = b.multiply(x, cos)?;

    let x_t = b.transpose(x, -2, -1)?;
    let first = b.matmul(rot, x_t)?;
    let first = b.transpose(first, -2, -1)?;
    let first = b.multiply(first, scale)?;

    let x_t = b.transpose(x, -2, -1)?;
    let second = b.matmul(rot_t, x_t)?;
    let second = b.transpose(second, -2, -1)?;

    let rotated = b.concat(&[first, second], -1)?;
    let rotated = b.multiply(rotated, sin)?;
    b.add(direct, rotated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cases_are_discoverable() {
        let names = all_cases().iter().map(|case| case.name).collect::<Vec<_>>();
        assert!(names.contains(&"test_mnist"));
        assert!(names.contains(&"test_llama_attention"));
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(find_case("test_mnist").is_some());
        assert!(find_case("mnist").is_none());
    }
}
