//! Token-approximate text chunking.

/// Target chunk size for embeddings, in tokens.
pub const CHUNK_TOKENS: u64 = 512;

/// Texts per embedding request.
pub const EMBEDDING_BATCH_SIZE: usize = 100;

/// Tokens of a document fed to the summarizer.
pub const SUMMARY_INPUT_TOKENS: u64 = 3000;

/// Approximate token count of `text`.
pub fn estimate_tokens(text: &str, chars_per_token: u64) -> u64 {
    (text.chars().count() as u64).div_ceil(chars_per_token.max(1))
}

/// Split `text` into chunks of about `max_tokens`, breaking on whitespace.
///
/// A single word longer than a chunk is split mid-word.
pub fn chunk_text(text: &str, max_tokens: u64, chars_per_token: u64) -> Vec<String> {
    let max_chars = (max_tokens.max(1) * chars_per_token.max(1)) as usize;
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for word in text.split_whitespace() {
        let word_chars = word.chars().count();

        if word_chars > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() {
            word_chars
        } else {
            current_chars + 1 + word_chars
        };
        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }

        if !current.is_empty() {
            current.push(' ');
            current_chars += 1;
        }
        current.push_str(word);
        current_chars += word_chars;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// The leading `max_tokens` worth of `texts`, joined with newlines.
pub fn first_tokens<'a>(
    texts: impl IntoIterator<Item = &'a str>,
    max_tokens: u64,
    chars_per_token: u64,
) -> String {
    let budget = (max_tokens * chars_per_token.max(1)) as usize;
    let joined = texts.into_iter().collect::<Vec<_>>().join("\n");
    match joined.char_indices().nth(budget) {
        Some((byte_index, _)) => joined[..byte_index].to_string(),
        None => joined,
    }
}
