use std::path::Path;

use tracing::{debug, info};

use crate::error::{GgufError, Result};
use crate::session::{alignment_padding, GgufFile, OpenMode};
use crate::tensor::TensorInfo;

/// Number of transformer layers in a Mixtral 8x7B model, and the length of
/// the per-layer expert selection array.
pub const MIXTRAL_LAYERS: usize = 32;

/// Extract a single expert per layer from a Mixtral MoE model, producing a
/// dense (non-MoE) GGUF file.
///
/// `experts_id[layer]` selects which expert's feed-forward tensors to keep
/// for that layer. Metadata is copied verbatim except for the
/// `llama.expert_*` keys, which describe the routing the output no longer
/// has. Kept expert tensors are renamed by dropping the expert id component
/// (`blk.3.ffn_gate.1.weight` becomes `blk.3.ffn_gate.weight`); all other
/// tensors are copied unchanged. The output file is overwritten if present.
pub fn split_mixtral(
    source: &Path,
    output: &Path,
    experts_id: &[u8; MIXTRAL_LAYERS],
) -> Result<()> {
    let mut src = GgufFile::open(source, OpenMode::Read)?;
    let mut dst = GgufFile::create(output, true)?;

    // Copy the metadata section, dropping the expert routing keys. The raw
    // value bytes go across untouched.
    while let Some(key) = src.next_key()? {
        let start = src.offset();
        src.skip_value(key.value_type)?;
        let end = src.offset();
        if key.name.contains("llama.expert_") {
            debug!(key = %key.name, "dropping expert metadata");
            continue;
        }
        debug!(key = %key.name, "copying metadata");
        let value = src.bytes_between(start, end);
        dst.append_kv(&key.name, key.value_type, value)?;
    }

    // Scan the source tensors, deciding which survive and under what name.
    struct Kept {
        dest_name: String,
        info: TensorInfo,
    }
    let mut kept: Vec<Kept> = Vec::new();
    while let Some(tensor) = src.next_tensor()? {
        match dest_tensor_name(&tensor.name, experts_id)? {
            Some(dest_name) => kept.push(Kept {
                dest_name,
                info: tensor,
            }),
            None => debug!(tensor = %tensor.name, "skipping non-selected expert tensor"),
        }
    }

    // Emit every descriptor with sequentially computed aligned offsets,
    // then every payload in the same order.
    let mut offset = 0u64;
    for tensor in &kept {
        offset += alignment_padding(dst.alignment(), offset);
        dst.append_tensor_info(
            &tensor.dest_name,
            &tensor.info.dims[..tensor.info.ndim as usize],
            tensor.info.dtype,
            offset,
        )?;
        offset += tensor.info.data_size();
    }
    for tensor in &kept {
        info!(
            tensor = %tensor.dest_name,
            source = %tensor.info.name,
            bytes = tensor.info.data_size(),
            "writing tensor"
        );
        dst.append_tensor_data(src.tensor_data(&tensor.info))?;
    }
    Ok(())
}

/// Decide the output name for a source tensor.
///
/// Returns `None` when the tensor belongs to an expert other than the one
/// selected for its layer. Expert-selective tensors are the feed-forward
/// ones (`.ffn_` in the name) except the shared `.ffn_norm` weights.
fn dest_tensor_name(name: &str, experts_id: &[u8; MIXTRAL_LAYERS]) -> Result<Option<String>> {
    if !name.contains(".ffn_") || name.contains(".ffn_norm") {
        return Ok(Some(name.to_string()));
    }

    let layer_digits = name
        .strip_prefix("blk.")
        .and_then(|rest| rest.split('.').next())
        .ok_or_else(|| {
            GgufError::Invalid(format!(
                "feed-forward tensor {} does not follow blk.<layer> naming",
                name
            ))
        })?;
    let layer: usize = layer_digits.parse().map_err(|_| {
        GgufError::Invalid(format!(
            "feed-forward tensor {} has a non-numeric layer index",
            name
        ))
    })?;
    if layer >= MIXTRAL_LAYERS {
        return Err(GgufError::Invalid(format!(
            "tensor {} addresses layer {} (model has {})",
            name, layer, MIXTRAL_LAYERS
        )));
    }

    let needle = format!(".{}.weight", experts_id[layer]);
    if !name.contains(&needle) {
        return Ok(None);
    }
    Ok(Some(name.replacen(&needle, ".weight", 1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_quant::TensorType;

    #[test]
    fn test_dest_name_passthrough() {
        let experts = [0u8; MIXTRAL_LAYERS];
        assert_eq!(
            dest_tensor_name("blk.0.attn_q.weight", &experts).unwrap(),
            Some("blk.0.attn_q.weight".to_string())
        );
        assert_eq!(
            dest_tensor_name("blk.5.ffn_norm.weight", &experts).unwrap(),
            Some("blk.5.ffn_norm.weight".to_string())
        );
        assert_eq!(
            dest_tensor_name("output.weight", &experts).unwrap(),
            Some("output.weight".to_string())
        );
    }

    #[test]
    fn test_dest_name_selects_and_renames_expert() {
        let mut experts = [0u8; MIXTRAL_LAYERS];
        experts[3] = 5;
        assert_eq!(
            dest_tensor_name("blk.3.ffn_gate.5.weight", &experts).unwrap(),
            Some("blk.3.ffn_gate.weight".to_string())
        );
        assert_eq!(dest_tensor_name("blk.3.ffn_gate.4.weight", &experts).unwrap(), None);
        // Layer 0 still selects expert 0.
        assert_eq!(
            dest_tensor_name("blk.0.ffn_up.0.weight", &experts).unwrap(),
            Some("blk.0.ffn_up.weight".to_string())
        );
    }

    #[test]
    fn test_dest_name_rejects_malformed_layers() {
        let experts = [0u8; MIXTRAL_LAYERS];
        assert!(dest_tensor_name("layers.0.ffn_gate.0.weight", &experts).is_err());
        assert!(dest_tensor_name("blk.x.ffn_gate.0.weight", &experts).is_err());
        assert!(dest_tensor_name("blk.99.ffn_gate.0.weight", &experts).is_err());
    }

    #[test]
    fn test_split_mixtral_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("mixtral.gguf");
        let dst_path = dir.path().join("dense.gguf");

        let expert0: Vec<u8> = [1.0f32, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let expert1: Vec<u8> = [3.0f32, 4.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let norm: Vec<u8> = [5.0f32, 6.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let attn: Vec<u8> = [7.0f32, 8.0].iter().flat_map(|v| v.to_le_bytes()).collect();

        let mut w = GgufFile::create(&src_path, true).unwrap();
        w.append_kv_u32("llama.expert_count", 8).unwrap();
        w.append_kv_u32("general.alignment", 32).unwrap();
        let names = [
            "blk.0.ffn_gate.0.weight",
            "blk.0.ffn_gate.1.weight",
            "blk.0.ffn_norm",
            "blk.0.attn_q.weight",
        ];
        for (i, name) in names.iter().enumerate() {
            w.append_tensor_info(name, &[2], TensorType::F32, i as u64 * 32)
                .unwrap();
        }
        for data in [&expert0, &expert1, &norm, &attn] {
            w.append_tensor_data(data).unwrap();
        }
        drop(w);

        let experts = [1u8; MIXTRAL_LAYERS];
        split_mixtral(&src_path, &dst_path, &experts).unwrap();

        let mut out = GgufFile::open(&dst_path, OpenMode::Read).unwrap();
        let mut keys = Vec::new();
        while let Some(key) = out.next_key().unwrap() {
            out.skip_value(key.value_type).unwrap();
            keys.push(key.name);
        }
        assert_eq!(keys, vec!["general.alignment"]);

        let mut tensors = Vec::new();
        while let Some(t) = out.next_tensor().unwrap() {
            assert_eq!(t.abs_offset % 32, 0);
            tensors.push(t);
        }
        let names: Vec<&str> = tensors.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["blk.0.ffn_gate.weight", "blk.0.ffn_norm", "blk.0.attn_q.weight"]
        );
        // The kept gate weights are expert 1's.
        assert_eq!(out.tensor_data(&tensors[0]), expert1.as_slice());
        assert_eq!(out.tensor_data(&tensors[1]), norm.as_slice());
        assert_eq!(out.tensor_data(&tensors[2]), attn.as_slice());
    }
}
