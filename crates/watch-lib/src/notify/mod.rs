//! Alert delivery
//!
//! Handles:
//! - Rendering a chart of the series and its expected range
//! - Delivering text and chart to a chat channel

mod chart;
mod telegram;

pub use chart::{PngChartRenderer, SvgChartRenderer};
pub use telegram::{TelegramConfig, TelegramNotifier};

use async_trait::async_trait;
use tracing::info;

use crate::error::DeliveryError;
use crate::models::{Bounds, TimeSeries};

/// Rendered chart ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedChart {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: &'static str,
}

/// Trait for chart renderers
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    /// Render the series with its per-bucket bounds
    async fn render(
        &self,
        series: &TimeSeries,
        band: &[Option<Bounds>],
    ) -> Result<RenderedChart, DeliveryError>;
}

/// Trait for alert delivery channels
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name
    fn name(&self) -> &str;

    /// Send a text message to `channel`
    async fn send_text(&self, channel: &str, text: &str) -> Result<(), DeliveryError>;

    /// Send an image to `channel`
    async fn send_image(&self, channel: &str, image: &RenderedChart) -> Result<(), DeliveryError>;
}

/// Notifier that only writes alerts to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send_text(&self, channel: &str, text: &str) -> Result<(), DeliveryError> {
        info!(channel = %channel, text = %text, "Alert message");
        Ok(())
    }

    async fn send_image(&self, channel: &str, image: &RenderedChart) -> Result<(), DeliveryError> {
        info!(
            channel = %channel,
            file_name = %image.file_name,
            bytes = image.bytes.len(),
            "Alert chart"
        );
        Ok(())
    }
}
