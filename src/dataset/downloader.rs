//! データセットの取得と展開
//!
//! リモートのtar.gzアーカイブをキャッシュディレクトリにダウンロード・展開します。
//! 展開済みディレクトリが存在する場合はネットワークにアクセスしません。

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;

/// 花画像データセットのURL
pub const DATASET_URL: &str =
    "https://storage.googleapis.com/download.tensorflow.org/example_images/flower_photos.tgz";

/// 展開後のデータセットディレクトリ名
pub const DATASET_DIR_NAME: &str = "flower_photos";

/// キャッシュディレクトリ名
const CACHE_DIR_NAME: &str = "flower-classifier";

/// データセットのデフォルトキャッシュディレクトリ
///
/// プラットフォームのキャッシュディレクトリが取得できない場合はカレントディレクトリ下を使う。
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join(CACHE_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".cache").join(CACHE_DIR_NAME))
}

/// データセットを取得し、展開済みルートディレクトリのパスを返す
///
/// `<cache_dir>/<dir_name>` が既に存在すればそのまま返す。
pub fn fetch_dataset(url: &str, cache_dir: &Path, dir_name: &str) -> Result<PathBuf> {
    let data_dir = cache_dir.join(dir_name);

    if data_dir.is_dir() {
        log::info!("キャッシュ済みのデータセットを使用します: {}", data_dir.display());
        return Ok(data_dir);
    }

    log::info!("データセットをダウンロードしています: {}", url);
    let bytes = download_file_as_bytes(url)?;
    log::info!("ダウンロード完了: {:.2} MB", bytes.len() as f64 / 1024.0 / 1024.0);

    install_archive(bytes.as_slice(), cache_dir, dir_name)
}

/// アーカイブを作業ディレクトリに展開し、成功した場合のみ `<cache_dir>/<dir_name>` に配置する
///
/// 展開に失敗した場合は作業ディレクトリを削除し、キャッシュには何も残さない。
pub fn install_archive<R: Read>(reader: R, cache_dir: &Path, dir_name: &str) -> Result<PathBuf> {
    let data_dir = cache_dir.join(dir_name);
    let staging_dir = cache_dir.join(format!("{}.partial", dir_name));

    fs::create_dir_all(cache_dir)
        .with_context(|| format!("Failed to create cache directory: {:?}", cache_dir))?;

    if staging_dir.exists() {
        fs::remove_dir_all(&staging_dir)
            .with_context(|| format!("Failed to remove stale directory: {:?}", staging_dir))?;
    }

    let result = extract_archive(reader, &staging_dir).and_then(|()| {
        let extracted = staging_dir.join(dir_name);
        if !extracted.is_dir() {
            anyhow::bail!("Archive did not contain the expected directory '{}'", dir_name);
        }
        fs::rename(&extracted, &data_dir)
            .with_context(|| format!("Failed to move dataset into {:?}", data_dir))
    });

    // 成功時も失敗時も作業ディレクトリは不要
    if staging_dir.exists() {
        if let Err(e) = fs::remove_dir_all(&staging_dir) {
            log::warn!("作業ディレクトリを削除できません {}: {}", staging_dir.display(), e);
        }
    }

    result?;
    Ok(data_dir)
}

/// URLの内容をバイト列として取得
fn download_file_as_bytes(url: &str) -> Result<Vec<u8>> {
    let mut response = reqwest::blocking::get(url)
        .and_then(|response| response.error_for_status())
        .with_context(|| format!("Failed to download {}", url))?;

    let mut bytes = Vec::new();
    response
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read response body from {}", url))?;

    Ok(bytes)
}

/// gzip圧縮されたtarアーカイブを展開
pub fn extract_archive<R: Read>(reader: R, dest_dir: &Path) -> Result<()> {
    let decoder = GzDecoder::new(reader);
    let mut archive = Archive::new(decoder);

    archive
        .unpack(dest_dir)
        .with_context(|| format!("Failed to extract archive into {:?}", dest_dir))?;

    Ok(())
}
