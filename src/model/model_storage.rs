//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラスラベル、画像サイズ、学習結果など）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 保存先パス（.gzで終わっていなければ.tar.gzを付ける）
pub fn archive_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

fn append_entry<W: Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// アーカイブから指定した名前のエントリを読み出す
fn read_entries(tar_gz_path: &Path, wanted: &[&str]) -> Result<HashMap<String, Vec<u8>>> {
    let tar_gz_file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    let mut archive = Archive::new(GzDecoder::new(tar_gz_file));

    let mut found = HashMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().to_string();
        if wanted.contains(&name.as_str()) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            found.insert(name, buffer);
        }
    }

    for name in wanted {
        if !found.contains_key(*name) {
            anyhow::bail!("{} not found in tar.gz archive", name);
        }
    }
    Ok(found)
}

fn parse_metadata(bytes: Vec<u8>) -> Result<ModelMetadata> {
    let json_str = String::from_utf8(bytes).context("metadata.json is not valid UTF-8")?;
    ModelMetadata::from_json_string(&json_str)
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 実際に書き込んだパスを返します。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = archive_path(output_path);

    if let Some(parent) = tar_gz_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;
    let mut tar_builder = Builder::new(GzEncoder::new(tar_gz_file, Compression::default()));

    append_entry(
        &mut tar_builder,
        METADATA_ENTRY,
        metadata.to_json_string()?.as_bytes(),
    )?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    tar_builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?
        .finish()
        .context("Failed to finish gzip stream")?;

    Ok(tar_gz_path)
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY])?;
    parse_metadata(entries.remove(METADATA_ENTRY).unwrap_or_default())
}

/// Tar.gzからモデルバイナリを読み込む
pub fn load_model_binary(tar_gz_path: &Path) -> Result<Vec<u8>> {
    let mut entries = read_entries(tar_gz_path, &[MODEL_ENTRY])?;
    Ok(entries.remove(MODEL_ENTRY).unwrap_or_default())
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY, MODEL_ENTRY])?;
    let metadata = parse_metadata(entries.remove(METADATA_ENTRY).unwrap_or_default())?;
    let binary = entries.remove(MODEL_ENTRY).unwrap_or_default();
    Ok((metadata, binary))
}

fn format_accuracy(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.1}%", v))
        .unwrap_or_else(|| "-".to_string())
}

/// メタデータをログに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    info!("=== モデルメタデータ ===");
    info!("クラスラベル: {}", metadata.class_labels.join(", "));
    info!(
        "学習データ画像サイズ: {}x{} (幅x高さ)",
        metadata.image_width, metadata.image_height
    );
    info!(
        "モデル: patch={} depth={} hidden={}",
        metadata.model.patch_size, metadata.model.depth, metadata.model.num_hidden
    );
    info!("学習ステップ数: {}", metadata.num_steps);
    info!("最終損失: {:.6}", metadata.final_loss);
    info!("ミニバッチ精度: {}", format_accuracy(metadata.minibatch_accuracy));
    info!("検証精度: {}", format_accuracy(metadata.validation_accuracy));
    info!("学習日時: {}", metadata.trained_at);
}
