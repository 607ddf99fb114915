//! 歯の位置分類の実験を実行する
//!
//! 設定は作業ディレクトリの config.json から読み込みます（無ければデフォルト値）。

use tooth_classifier_lib::model::AppConfig;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load_or_default();
    config.display();

    let report = tooth_classifier_lib::run_experiment(&config)?;

    log::info!("ステップ数: {}", report.steps);
    log::info!("最終損失: {:.6}", report.final_loss);
    if let Some(accuracy) = report.validation_accuracy {
        log::info!("最終検証精度: {:.1}%", accuracy);
    }
    Ok(())
}
