// SPDX-License-Identifier: GPL-3.0-only

//! DNG writer: thumbnail IFD, raw CFA IFD, and EXIF sub-IFD (component
//! 4.G).
//!
//! Tag insertion follows the pattern this codebase's photo encoder uses
//! (`dng::ifd::{Ifd, IfdValue, Offsets}`, `dng::tags::ifd` bare tag
//! constants, `DngWriter::write_dng`). The custom `ForwardMatrix1` tag
//! (50964) is not in `dng::tags::ifd`; it is declared here as a `u16`
//! constant on the assumption that the crate's tag constants are
//! themselves plain `u16` values, matching `Ifd::insert`'s key type. The
//! raw CFA IFD is a second top-level IFD passed alongside the thumbnail
//! IFD to `DngWriter::write_dng`; only the EXIF IFD is nested, via
//! `IfdValue::Ifd`, assumed to exist for composing sub-directories the
//! way the rest of this crate's API composes strip data via
//! `IfdValue::Offsets`.

use std::io::Cursor;
use std::sync::Arc;

use dng::ifd::{Ifd, IfdValue, Offsets};
use dng::tags::ifd as tiff_tags;
use dng::{DngWriter, FileType};

use crate::errors::DngError;

/// DNG tag 50964, `ForwardMatrix1`: SRATIONAL[9], not defined by the
/// `dng` crate's tag table.
const FORWARD_MATRIX_1: u16 = 50964;

/// Per-device calibration and identity carried into every DNG this engine
/// writes.
#[derive(Debug, Clone)]
pub struct DngCalibration {
    pub make: String,
    pub model: String,
    pub color_matrix: [f64; 9],
    pub forward_matrix: Option<[f64; 9]>,
    pub black_level: Option<u32>,
    pub white_level: Option<u32>,
    pub focal_length_mm: Option<f64>,
    pub crop_factor: Option<f64>,
    pub f_number: Option<f64>,
}

/// sRGB-ish fallback used when a device has no configured color matrix.
pub const SRGB_FALLBACK_MATRIX: [f64; 9] = [
    0.4124, 0.3576, 0.1805, 0.2126, 0.7152, 0.0722, 0.0193, 0.1192, 0.9505,
];

/// Per-frame exposure values needed to compute EXIF tags.
#[derive(Debug, Clone, Copy)]
pub struct FrameExposure {
    pub frame_interval_s: f64,
    pub exposure_rows: u32,
    pub sensor_height: u32,
    pub gain: i32,
    pub gain_max: i32,
    pub iso_min: u32,
    pub iso_max: u32,
}

struct ByteOffsets {
    data: Vec<u8>,
}

impl Offsets for ByteOffsets {
    fn size(&self) -> u32 {
        self.data.len() as u32
    }

    fn write(&self, writer: &mut dyn std::io::Write) -> std::io::Result<()> {
        writer.write_all(&self.data)
    }
}

fn to_srational9(values: &[f64; 9]) -> IfdValue {
    IfdValue::List(
        values
            .iter()
            .map(|&v| {
                let denom = 1_000_000i32;
                let num = (v * denom as f64).round() as i32;
                IfdValue::SRational(num, denom)
            })
            .collect(),
    )
}

fn rational(numerator: u32, denominator: u32) -> IfdValue {
    let g = gcd(numerator, denominator);
    let g = g.max(1);
    IfdValue::Rational(numerator / g, denominator / g)
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a.max(1)
}

/// `ISOSpeedRatings = remap(gain-1, [0,gain_max] -> [iso_min,iso_max])`.
fn remap_iso(exposure: &FrameExposure) -> u32 {
    if exposure.gain_max <= 0 {
        return exposure.iso_min;
    }
    let gain = (exposure.gain - 1).max(0) as f64;
    let frac = gain / exposure.gain_max as f64;
    let iso = exposure.iso_min as f64
        + frac * (exposure.iso_max as f64 - exposure.iso_min as f64);
    iso.round().clamp(exposure.iso_min as f64, exposure.iso_max as f64) as u32
}

fn build_exif_ifd(exposure: &FrameExposure, auto_exposure: bool) -> Ifd {
    let mut ifd = Ifd::default();
    ifd.insert(
        tiff_tags::ExposureProgram,
        IfdValue::Short(if auto_exposure { 2 } else { 1 }),
    );

    let exposure_time_s =
        exposure.frame_interval_s * (exposure.exposure_rows as f64 / exposure.sensor_height as f64);
    let numerator = (exposure_time_s * 1_000_000.0).round().max(0.0) as u32;
    ifd.insert(tiff_tags::ExposureTime, rational(numerator, 1_000_000));

    ifd.insert(
        tiff_tags::ISOSpeedRatings,
        IfdValue::Short(remap_iso(exposure).min(65535) as u16),
    );
    ifd.insert(tiff_tags::Flash, IfdValue::Short(0));

    let now = chrono::Local::now().format("%Y:%m:%d %H:%M:%S").to_string();
    ifd.insert(tiff_tags::DateTimeOriginal, IfdValue::Ascii(now.clone()));
    ifd.insert(tiff_tags::DateTimeDigitized, IfdValue::Ascii(now));

    ifd
}

fn build_thumbnail_ifd(
    width: u32,
    height: u32,
    calibration: &DngCalibration,
    now: &str,
) -> Ifd {
    let thumb_w = (width / 16).max(1);
    let thumb_h = (height / 16).max(1);
    let pixels = vec![0u8; (thumb_w * thumb_h * 3) as usize];

    let mut ifd = Ifd::default();
    ifd.insert(tiff_tags::NewSubfileType, IfdValue::Long(1));
    ifd.insert(tiff_tags::ImageWidth, IfdValue::Long(thumb_w));
    ifd.insert(tiff_tags::ImageLength, IfdValue::Long(thumb_h));
    ifd.insert(
        tiff_tags::BitsPerSample,
        IfdValue::List(vec![IfdValue::Short(8), IfdValue::Short(8), IfdValue::Short(8)]),
    );
    ifd.insert(tiff_tags::Compression, IfdValue::Short(1));
    ifd.insert(tiff_tags::PhotometricInterpretation, IfdValue::Short(2));
    ifd.insert(tiff_tags::SamplesPerPixel, IfdValue::Short(3));
    ifd.insert(tiff_tags::RowsPerStrip, IfdValue::Long(thumb_h));
    ifd.insert(tiff_tags::PlanarConfiguration, IfdValue::Short(1));
    ifd.insert(tiff_tags::Orientation, IfdValue::Short(1));

    let offsets: Arc<dyn Offsets + Send + Sync> = Arc::new(ByteOffsets { data: pixels.clone() });
    ifd.insert(tiff_tags::StripOffsets, IfdValue::Offsets(offsets));
    ifd.insert(tiff_tags::StripByteCounts, IfdValue::Long(pixels.len() as u32));

    ifd.insert(tiff_tags::Make, IfdValue::Ascii(calibration.make.clone()));
    ifd.insert(tiff_tags::Model, IfdValue::Ascii(calibration.model.clone()));
    ifd.insert(tiff_tags::DateTime, IfdValue::Ascii(now.to_string()));
    ifd.insert(tiff_tags::Software, IfdValue::Ascii("Megapixels".to_string()));
    ifd.insert(
        tiff_tags::UniqueCameraModel,
        IfdValue::Ascii(format!("{} {}", calibration.make, calibration.model)),
    );
    ifd.insert(
        tiff_tags::DNGVersion,
        IfdValue::List(vec![
            IfdValue::Byte(1),
            IfdValue::Byte(1),
            IfdValue::Byte(0),
            IfdValue::Byte(0),
        ]),
    );
    ifd.insert(
        tiff_tags::DNGBackwardVersion,
        IfdValue::List(vec![
            IfdValue::Byte(1),
            IfdValue::Byte(0),
            IfdValue::Byte(0),
            IfdValue::Byte(0),
        ]),
    );
    ifd.insert(tiff_tags::ColorMatrix1, to_srational9(&calibration.color_matrix));
    if let Some(fm) = calibration.forward_matrix {
        ifd.insert(FORWARD_MATRIX_1, to_srational9(&fm));
    }
    ifd.insert(
        tiff_tags::AsShotNeutral,
        IfdValue::List(vec![
            IfdValue::Rational(1, 1),
            IfdValue::Rational(1, 1),
            IfdValue::Rational(1, 1),
        ]),
    );
    ifd.insert(tiff_tags::CalibrationIlluminant1, IfdValue::Short(21));

    ifd
}

fn build_raw_ifd(
    cfa_plane: &[u8],
    width: u32,
    height: u32,
    calibration: &DngCalibration,
) -> Ifd {
    let mut ifd = Ifd::default();
    ifd.insert(tiff_tags::NewSubfileType, IfdValue::Long(0));
    ifd.insert(tiff_tags::ImageWidth, IfdValue::Long(width));
    ifd.insert(tiff_tags::ImageLength, IfdValue::Long(height));
    ifd.insert(tiff_tags::BitsPerSample, IfdValue::Short(8));
    ifd.insert(tiff_tags::Compression, IfdValue::Short(1));
    ifd.insert(tiff_tags::PhotometricInterpretation, IfdValue::Short(32803)); // CFA
    ifd.insert(tiff_tags::SamplesPerPixel, IfdValue::Short(1));
    ifd.insert(tiff_tags::RowsPerStrip, IfdValue::Long(height));
    ifd.insert(tiff_tags::PlanarConfiguration, IfdValue::Short(1));
    ifd.insert(
        tiff_tags::CFARepeatPatternDim,
        IfdValue::List(vec![IfdValue::Short(2), IfdValue::Short(2)]),
    );
    ifd.insert(
        tiff_tags::CFAPattern,
        IfdValue::List(
            [2u8, 1, 1, 0] // BGGR: B G / G R
                .iter()
                .map(|&b| IfdValue::Byte(b))
                .collect(),
        ),
    );

    if let Some(black) = calibration.black_level {
        ifd.insert(tiff_tags::BlackLevel, IfdValue::Long(black));
    }
    if let Some(white) = calibration.white_level {
        ifd.insert(tiff_tags::WhiteLevel, IfdValue::Long(white));
    }

    let offsets: Arc<dyn Offsets + Send + Sync> =
        Arc::new(ByteOffsets { data: cfa_plane.to_vec() });
    ifd.insert(tiff_tags::StripOffsets, IfdValue::Offsets(offsets));
    ifd.insert(tiff_tags::StripByteCounts, IfdValue::Long(cfa_plane.len() as u32));

    ifd
}

/// Writes one DNG file: two top-level IFDs (thumbnail IFD0, raw CFA IFD1),
/// with EXIF linked as a sub-IFD from IFD0, to `out`. `cfa_plane` is the
/// full-resolution 8-bit CFA data copied verbatim from an `OwnedImage`.
pub fn write_dng(
    out: &mut Vec<u8>,
    cfa_plane: &[u8],
    width: u32,
    height: u32,
    calibration: &DngCalibration,
    exposure: &FrameExposure,
    auto_exposure: bool,
) -> Result<(), DngError> {
    let now = chrono::Local::now().format("%Y:%m:%d %H:%M:%S").to_string();

    let exif_ifd = build_exif_ifd(exposure, auto_exposure);
    let raw_ifd = build_raw_ifd(cfa_plane, width, height, calibration);
    let mut thumb_ifd = build_thumbnail_ifd(width, height, calibration, &now);

    // IFD0 (thumbnail) links EXIF as a sub-IFD; the raw CFA IFD is its own
    // top-level IFD1, per 4.G's ordering note.
    thumb_ifd.insert(tiff_tags::ExifIFD, IfdValue::Ifd(Arc::new(exif_ifd)));

    let cursor = Cursor::new(&mut *out);
    DngWriter::write_dng(cursor, true, FileType::Dng, vec![thumb_ifd, raw_ifd])
        .map_err(|e| DngError::EncodingFailed(format!("{e:?}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remap_iso_clamps_to_configured_range() {
        let exposure = FrameExposure {
            frame_interval_s: 1.0 / 30.0,
            exposure_rows: 100,
            sensor_height: 100,
            gain: 1,
            gain_max: 255,
            iso_min: 100,
            iso_max: 1600,
        };
        assert_eq!(remap_iso(&exposure), 100);

        let maxed = FrameExposure { gain: 256, ..exposure };
        assert_eq!(remap_iso(&maxed), 1600);
    }

    #[test]
    fn srational9_round_trips_sign() {
        let values = [1.0, -2.5, 0.0, 3.0, -4.0, 5.0, -6.0, 7.0, -8.0];
        if let IfdValue::List(items) = to_srational9(&values) {
            assert_eq!(items.len(), 9);
        } else {
            panic!("expected list");
        }
    }
}
