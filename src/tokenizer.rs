//! Token counting for the embedding token cap (§4.2). Backed by `tiktoken-rs`'s
//! `cl100k_base` encoding — the pack's recurring choice for this exact job (see
//! `moabualruz-ricecoder`'s own comment recommending tiktoken-rs for accurate
//! counting, and the `retrieval/chunking` modules in `mylinyuzhi-codex` /
//! `openai-codex` that depend on it directly).

use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;

static ENCODING: Lazy<CoreBPE> =
    Lazy::new(|| tiktoken_rs::cl100k_base().expect("cl100k_base encoding tables are bundled"));

/// Special-token strings the encoder treats as control sequences rather than
/// literal text. A chunk that happens to contain one verbatim (e.g. quoting
/// model output in documentation) must have it escaped before counting, or
/// the tokenizer will reject the input outright.
const SPECIAL_TOKENS: &[&str] = &[
    "<|endoftext|>",
    "<|fim_prefix|>",
    "<|fim_middle|>",
    "<|fim_suffix|>",
    "<|endofprompt|>",
];

/// Replaces literal special-token strings with their HTML-escaped form so
/// counting never fails on content that merely mentions them.
pub fn sanitize(text: &str) -> String {
    let mut out = text.to_string();
    for tok in SPECIAL_TOKENS {
        if out.contains(tok) {
            let escaped = tok.replace('<', "&lt;").replace('>', "&gt;");
            out = out.replace(tok, &escaped);
        }
    }
    out
}

/// Token count of `text` under the cl100k_base encoding, after sanitizing
/// any literal special-token strings.
pub fn count_tokens(text: &str) -> usize {
    let sanitized = sanitize(text);
    ENCODING.encode_ordinary(&sanitized).len()
}

/// Truncates `text` to at most `max_tokens` tokens under the cl100k_base
/// encoding, used to bound the file content embedded into context-generation
/// prompts (§4.6). Returns `text` unchanged when it's already within budget.
pub fn truncate_to_token_limit(text: &str, max_tokens: usize) -> String {
    let sanitized = sanitize(text);
    let tokens = ENCODING.encode_ordinary(&sanitized);
    if tokens.len() <= max_tokens {
        return text.to_string();
    }
    ENCODING
        .decode(tokens[..max_tokens].to_vec())
        .unwrap_or_else(|_| text.to_string())
}
