//! Watermark binder
//!
//! Describes the identity overlay drawn over viewer content: a rotating grid of
//! identity tiles, a banner, a corner timestamp and an HMAC fingerprint that
//! ties identity, time and document together under a per-process key.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::time::Instant;

use crate::config::WatermarkConfig;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Angle of the tile grid at time zero, in degrees
pub const INITIAL_ANGLE: f64 = -45.0;

/// Smallest tile grid that still puts a tile centre inside any region
/// covering a quarter of the surface
pub const MIN_GRID_SIZE: u32 = 4;

/// One identity tile; the centre is in surface-relative units (0..1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkTile {
    pub x: f64,
    pub y: f64,
    pub text: String,
}

/// Overlay description consumed by the surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkSpec {
    pub identity: String,
    pub filename: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Rotation of the tile grid, in degrees within [-180, 180)
    pub angle: f64,
    pub banner: String,
    pub corner_label: String,
    pub tiles: Vec<WatermarkTile>,
    /// Hex HMAC-SHA256 over identity, timestamp and filename
    pub fingerprint: String,
}

impl WatermarkSpec {
    /// True when some tile centre falls inside the rectangle (surface-relative)
    pub fn covers(&self, x0: f64, y0: f64, x1: f64, y1: f64) -> bool {
        self.tiles
            .iter()
            .any(|t| t.x >= x0 && t.x <= x1 && t.y >= y0 && t.y <= y1)
    }
}

pub struct WatermarkBinder {
    key: [u8; 32],
    grid_size: u32,
    degrees_per_sec: f64,
    started: Instant,
}

impl std::fmt::Debug for WatermarkBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkBinder")
            .field("grid_size", &self.grid_size)
            .field("degrees_per_sec", &self.degrees_per_sec)
            .finish()
    }
}

impl WatermarkBinder {
    /// Binder with a fresh random key
    pub fn new(config: &WatermarkConfig) -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::with_key(key, config)
    }

    pub fn with_key(key: [u8; 32], config: &WatermarkConfig) -> Self {
        Self {
            key,
            grid_size: config.grid_size.max(MIN_GRID_SIZE),
            degrees_per_sec: config.rotation_speed_deg_per_sec,
            started: Instant::now(),
        }
    }

    /// Overlay for `identity` viewing `filename`, as of now
    pub fn describe(&self, identity: &str, filename: Option<&str>) -> Result<WatermarkSpec> {
        self.describe_at(identity, filename, Utc::now(), self.started.elapsed())
    }

    /// Overlay at an explicit wall-clock time and animation offset
    pub fn describe_at(
        &self,
        identity: &str,
        filename: Option<&str>,
        timestamp: DateTime<Utc>,
        elapsed: Duration,
    ) -> Result<WatermarkSpec> {
        let angle = (INITIAL_ANGLE + self.degrees_per_sec * elapsed.as_secs_f64() + 180.0)
            .rem_euclid(360.0)
            - 180.0;

        let n = self.grid_size;
        let mut tiles = Vec::with_capacity((n * n) as usize);
        for row in 0..n {
            for col in 0..n {
                tiles.push(WatermarkTile {
                    x: (f64::from(col) + 0.5) / f64::from(n),
                    y: (f64::from(row) + 0.5) / f64::from(n),
                    text: identity.to_string(),
                });
            }
        }

        Ok(WatermarkSpec {
            identity: identity.to_string(),
            filename: filename.map(str::to_string),
            timestamp,
            angle,
            banner: format!("CONFIDENTIAL - {}", identity.to_uppercase()),
            corner_label: format!("{} | {}", identity, timestamp.format("%H:%M:%S")),
            tiles,
            fingerprint: self.fingerprint(identity, timestamp, filename)?,
        })
    }

    /// Checks that `spec` was produced by this binder and not altered
    pub fn verify(&self, spec: &WatermarkSpec) -> bool {
        let Ok(expected) = hex::decode(&spec.fingerprint) else {
            return false;
        };
        match self.mac(&spec.identity, spec.timestamp, spec.filename.as_deref()) {
            Ok(mac) => mac.verify_slice(&expected).is_ok(),
            Err(_) => false,
        }
    }

    fn fingerprint(
        &self,
        identity: &str,
        timestamp: DateTime<Utc>,
        filename: Option<&str>,
    ) -> Result<String> {
        let mac = self.mac(identity, timestamp, filename)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn mac(
        &self,
        identity: &str,
        timestamp: DateTime<Utc>,
        filename: Option<&str>,
    ) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::CryptoError(e.to_string()))?;
        mac.update(identity.as_bytes());
        mac.update(b"\n");
        mac.update(timestamp.to_rfc3339().as_bytes());
        mac.update(b"\n");
        mac.update(filename.unwrap_or_default().as_bytes());
        Ok(mac)
    }
}
