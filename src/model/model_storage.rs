//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//! クラス名の順序が重みと常に一緒に扱われるようにするためです。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラス名、入力サイズ、学習履歴など）
//! - model.bin       - モデルの重み（バイナリ）

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 保存先パスを tar.gz ファイルのパスに解決
///
/// `.gz` で終わっていればそのまま、そうでなければ `.tar.gz` を付ける。
pub fn bundle_path(path: &Path) -> PathBuf {
    if path.extension().and_then(|s| s.to_str()) == Some("gz") {
        path.to_path_buf()
    } else {
        let mut file_name = path.file_name().unwrap_or_default().to_os_string();
        file_name.push(".tar.gz");
        path.with_file_name(file_name)
    }
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 既存のファイルは上書きする。保存したファイルのパスを返す。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = bundle_path(output_path);

    if let Some(parent) = tar_gz_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    tar_builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .context("Failed to finalize tar.gz archive")?;

    Ok(tar_gz_path)
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// Tar.gzから指定エントリを読み込む。見つからなければ None
fn read_entries(tar_gz_path: &Path, names: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
    let tar_gz_file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);
    let mut found = vec![None; names.len()];

    for entry in archive
        .entries()
        .with_context(|| format!("Failed to read tar.gz file: {:?}", tar_gz_path))?
    {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();

        if let Some(idx) = names.iter().position(|name| *name == path) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            found[idx] = Some(buffer);
        }
    }

    Ok(found)
}

fn parse_metadata(bytes: Vec<u8>) -> Result<ModelMetadata> {
    let json_str = String::from_utf8(bytes).context("metadata.json is not valid UTF-8")?;
    ModelMetadata::from_json_string(&json_str)
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(path: &Path) -> Result<ModelMetadata> {
    let tar_gz_path = bundle_path(path);
    let mut entries = read_entries(&tar_gz_path, &[METADATA_ENTRY])?;

    match entries.remove(0) {
        Some(bytes) => parse_metadata(bytes),
        None => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
    }
}

/// Tar.gzからモデルバイナリを読み込む
pub fn load_model_binary(path: &Path) -> Result<Vec<u8>> {
    let tar_gz_path = bundle_path(path);
    let mut entries = read_entries(&tar_gz_path, &[MODEL_ENTRY])?;

    entries
        .remove(0)
        .ok_or_else(|| anyhow::anyhow!("model.bin not found in tar.gz archive"))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let tar_gz_path = bundle_path(path);
    let mut entries = read_entries(&tar_gz_path, &[METADATA_ENTRY, MODEL_ENTRY])?;
    let model_binary = entries.pop().flatten();
    let metadata = entries.pop().flatten();

    match (metadata, model_binary) {
        (Some(metadata), Some(binary)) => Ok((parse_metadata(metadata)?, binary)),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

/// メタデータをログに出力
pub fn log_metadata_info(metadata: &ModelMetadata) {
    log::info!("=== モデルメタデータ ===");
    log::info!("クラス名: {}", metadata.class_names.join(", "));
    log::info!("入力サイズ: {}x{}", metadata.image_width, metadata.image_height);
    log::info!("学習エポック数: {}", metadata.num_epochs);
    log::info!("学習日時: {}", metadata.trained_at);
    if let Some(last) = metadata.history.last() {
        log::info!(
            "最終検証精度: {:.2}% (損失 {:.4})",
            last.valid_accuracy * 100.0,
            last.valid_loss
        );
    }
}
