// src/error.rs

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("Sheet `{0}` not found in workbook")]
    MissingSheet(String),
    #[error("QR-bill error: {0}")]
    QrBill(String),
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("Image conversion failed: {0}")]
    Raster(String),
}
