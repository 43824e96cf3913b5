//! End-to-end tests for the engine facade and its configuration

use inductionvm::{
    Graph, InductionConfig, InductionEngine, InductionError, Result, Tensor, TensorEnv, TokenId,
};
use std::io::Write;
use tempfile::NamedTempFile;

const MANIFEST: &str = r#"{
    "num_layers": 2,
    "max_seq_len": 16,
    "hidden_dim": 4,
    "kv_compress": { "mode": "int4" },
    "rope": { "enabled": true, "mode": "ntk", "factor": 2.0 },
    "spec_decode": { "draft_model_id": "draft-68m", "lookahead": 3 },
    "pattern": { "min_frequency": 2, "max_pattern_length": 4 }
}"#;

fn write_manifest(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

fn engine() -> InductionEngine {
    let file = write_manifest(MANIFEST);
    InductionEngine::new(InductionConfig::from_file(file.path()).unwrap()).unwrap()
}

#[test]
fn test_config_from_file() {
    let file = write_manifest(MANIFEST);
    let config = InductionConfig::from_file(file.path()).unwrap();
    assert_eq!(config.num_layers, 2);
    assert_eq!(config.kv_compress.mode, "int4");
    assert!(config.kv_compress.enabled);
    assert_eq!(config.rope.mode, "ntk");
    assert_eq!(config.spec_decode.lookahead, 3);
    assert_eq!(config.spec_decode.max_ngram, 3);

    // Round trip through the serialized form
    let again = InductionConfig::from_json_str(&config.to_json_string().unwrap()).unwrap();
    assert_eq!(again, config);
}

#[test]
fn test_invalid_manifests_rejected() {
    let bad_mode = write_manifest(r#"{ "kv_compress": { "mode": "fp8" } }"#);
    assert!(matches!(
        InductionConfig::from_file(bad_mode.path()),
        Err(InductionError::Config(_))
    ));

    let bad_json = write_manifest("{ num_layers: 2 ");
    assert!(matches!(
        InductionConfig::from_file(bad_json.path()),
        Err(InductionError::Serialization(_))
    ));

    assert!(matches!(
        InductionConfig::from_file("/nonexistent/induction.json"),
        Err(InductionError::Io(_))
    ));
}

#[test]
fn test_info_reflects_manifest() {
    let info = engine().info();
    assert_eq!(info.num_layers, 2);
    assert_eq!(info.max_seq_len, 16);
    assert!(info.spec_decode);
    assert_eq!(info.draft_model_id.as_deref(), Some("draft-68m"));
    assert!(info.kv_compress);
    assert!(info.rope_scale);
}

#[test]
fn test_execute_compress_and_unload() {
    let engine = engine();
    let mut graph = Graph::new();
    graph.kv_write("k", "v", 1).unwrap();
    graph.kv_read("k_all", "v_all", 1).unwrap();

    let kv = Tensor::from_f32(vec![1, 3, 4], (0..12).map(|i| i as f32 * 0.25).collect()).unwrap();
    let inputs: TensorEnv = [("k", kv.clone()), ("v", kv.clone())].into_iter().collect();
    let env = engine.execute_ir(&graph, inputs).unwrap();
    assert_eq!(env.require("k_all").unwrap(), &kv);

    let raw = engine.stats();
    engine.compress_layer(1).unwrap();
    let compressed = engine.stats();
    assert_eq!(compressed.compressed_layers, 1);
    assert!(compressed.kv_cache_bytes < raw.kv_cache_bytes);
    assert!(compressed.kv_cache_size_mb() > 0.0);

    // Compressing a layer that was never written fails
    assert!(matches!(
        engine.compress_layer(0),
        Err(InductionError::UninitializedLayer(0))
    ));

    engine.unload();
    assert_eq!(engine.stats().kv_cache_bytes, 0);
    assert!(!engine.with_scheduler(|s| s.cache().is_initialized(1).unwrap()));
}

#[test]
fn test_prompt_becomes_cacheable() {
    let engine = engine();
    let prompt: [TokenId; 3] = [7, 8, 9];
    let first = engine.observe_prompt(&prompt).unwrap();
    assert!(!first.cacheable);
    assert!(first.cache_key.is_none());

    let second = engine.observe_prompt(&prompt).unwrap();
    assert!(second.cacheable);
    let key = second.cache_key.unwrap();
    assert!(key.starts_with("pattern_"));
    assert_eq!(key.len(), "pattern_".len() + 16);

    // Same prompt, same key
    let third = engine.observe_prompt(&prompt).unwrap();
    assert_eq!(third.cache_key.as_deref(), Some(key.as_str()));

    let stats = engine.stats();
    assert_eq!(stats.patterns_mined, 3);
    assert_eq!(stats.frequent_patterns, 3);
}

#[test]
fn test_scaled_rope_table() {
    let table = engine().rope_table(8, 32).unwrap();
    assert_eq!(table.half_dim(), 4);
    assert_eq!(table.max_position(), 32);
    assert!(engine().rope_table(7, 32).is_err());
}

#[test]
fn test_speculative_generation() {
    let engine = engine();
    let mut target = |context: &[TokenId], draft: &[TokenId]| -> Result<Vec<TokenId>> {
        let mut last = context.last().copied().unwrap_or(0);
        let mut out = Vec::with_capacity(draft.len() + 1);
        for &d in draft {
            out.push((last + 1) % 4);
            last = d;
        }
        out.push((last + 1) % 4);
        Ok(out)
    };

    let (tokens, stats) = engine
        .generate_speculative(&mut target, &[0, 1, 2, 3, 0], 8)
        .unwrap();
    assert_eq!(tokens, vec![1, 2, 3, 0, 1, 2, 3, 0]);
    assert!(stats.accepted_tokens > 0);
    assert!(stats.rounds < 8);
}
