use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

/// XLM-RoBERTa `<pad>` id.
pub const PAD_ID: u32 = 1;

/// Tokenises a batch into `[B, T]` id and mask tensors, where `T` is the longest
/// encoding in the batch capped at `max_len`.
pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[String], max_len: usize, device: &Device) -> Result<(Tensor, Tensor)> {
    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    let seq_len = encodings.iter().map(|e| e.get_ids().len().min(max_len)).max().unwrap_or(1).max(1);

    let mut ids = Vec::with_capacity(texts.len() * seq_len);
    let mut mask = Vec::with_capacity(texts.len() * seq_len);
    for enc in &encodings {
        let take = enc.get_ids().len().min(seq_len);
        ids.extend_from_slice(&enc.get_ids()[..take]);
        mask.extend_from_slice(&enc.get_attention_mask()[..take]);
        let pad = seq_len - take;
        ids.extend(std::iter::repeat(PAD_ID).take(pad));
        mask.extend(std::iter::repeat(0u32).take(pad));
    }
    let input_ids = Tensor::from_vec(ids, (texts.len(), seq_len), device)?;
    let attention_mask = Tensor::from_vec(mask, (texts.len(), seq_len), device)?;
    Ok((input_ids, attention_mask))
}
