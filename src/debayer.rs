// SPDX-License-Identifier: GPL-3.0-only

//! Quick debayer: decimating BGGR-to-RGB24 preview filter (component 4.F).

/// Clamps a requested preview skip factor into the supported range,
/// preserving the `+1` step this filter has always applied after halving
/// and before clamping (see the open question in the design notes: kept
/// as-is rather than silently "fixed").
pub fn clamp_skip(requested_width: u32, preview_width: u32) -> u32 {
    if preview_width == 0 {
        return 1;
    }
    let raw = (requested_width / 2) / preview_width;
    (raw + 1).clamp(1, 3)
}

/// Orientation applied after decimation, in degrees clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    None,
    Clockwise90,
    Clockwise180,
    Clockwise270,
}

impl Rotation {
    pub fn from_degrees(deg: u32) -> Self {
        match deg % 360 {
            90 => Rotation::Clockwise90,
            180 => Rotation::Clockwise180,
            270 => Rotation::Clockwise270,
            _ => Rotation::None,
        }
    }
}

/// A packed RGB24 image produced by [`debayer`].
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

fn clamp_to_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Decimates a BGGR 8-bit plane of `width`x`height` into packed RGB24,
/// reading one 2x2 Bayer cell every `2*skip` pixels in each axis and
/// subtracting `black_level` from every sample before clamping to
/// `[0,255]`. `skip` should already be the output of [`clamp_skip`].
///
/// Output dimensions are `floor(width / (2*skip)) x floor(height / (2*skip))`.
pub fn debayer_bggr8(
    plane: &[u8],
    width: u32,
    height: u32,
    row_stride: u32,
    skip: u32,
    black_level: i32,
) -> RgbImage {
    let skip = skip.max(1);
    let step = 2 * skip;
    let out_w = width / step;
    let out_h = height / step;
    let mut data = vec![0u8; (out_w * out_h * 3) as usize];

    let sample = |row: u32, col: u32| -> i32 {
        plane[(row * row_stride + col) as usize] as i32
    };

    let mut out_row = 0u32;
    let mut row = 0u32;
    while out_row < out_h {
        let mut out_col = 0u32;
        let mut col = 0u32;
        while out_col < out_w {
            let b = sample(row, col);
            let g0 = sample(row, col + 1);
            let g1 = sample(row + 1, col);
            let r = sample(row + 1, col + 1);

            let out_idx = ((out_row * out_w + out_col) * 3) as usize;
            data[out_idx] = clamp_to_u8(r - black_level);
            data[out_idx + 1] = clamp_to_u8(((g0 + g1) / 2) - black_level);
            data[out_idx + 2] = clamp_to_u8(b - black_level);

            out_col += 1;
            col += step;
        }
        out_row += 1;
        row += step;
    }

    RgbImage {
        width: out_w,
        height: out_h,
        data,
    }
}

/// Rotates a packed RGB24 image by `rotation`, applied after decimation.
pub fn rotate(image: &RgbImage, rotation: Rotation) -> RgbImage {
    match rotation {
        Rotation::None => RgbImage {
            width: image.width,
            height: image.height,
            data: image.data.clone(),
        },
        Rotation::Clockwise180 => {
            let mut data = image.data.clone();
            data.chunks_mut(3).rev().for_each(|_| {});
            let mut out = vec![0u8; image.data.len()];
            let n = (image.width * image.height) as usize;
            for i in 0..n {
                let src = i * 3;
                let dst = (n - 1 - i) * 3;
                out[dst..dst + 3].copy_from_slice(&image.data[src..src + 3]);
            }
            RgbImage {
                width: image.width,
                height: image.height,
                data: out,
            }
        }
        Rotation::Clockwise90 | Rotation::Clockwise270 => {
            let (w, h) = (image.width, image.height);
            let mut out = vec![0u8; image.data.len()];
            for y in 0..h {
                for x in 0..w {
                    let src = ((y * w + x) * 3) as usize;
                    let (dx, dy) = if rotation == Rotation::Clockwise90 {
                        (h - 1 - y, x)
                    } else {
                        (y, w - 1 - x)
                    };
                    let dst = ((dy * h + dx) * 3) as usize;
                    out[dst..dst + 3].copy_from_slice(&image.data[src..src + 3]);
                }
            }
            RgbImage {
                width: h,
                height: w,
                data: out,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // S4: 4x4 BGGR plane, repeating B=10,G=20 / G=30,R=40, S=1, black_level=5
    // -> 2x2 RGB where each pixel is (R=35, G=20, B=5).
    #[test]
    fn s4_debayer_matches_reference() {
        let row = [10u8, 20, 10, 20];
        let row2 = [30u8, 40, 30, 40];
        let plane: Vec<u8> = row
            .iter()
            .chain(row2.iter())
            .chain(row.iter())
            .chain(row2.iter())
            .copied()
            .collect();
        let img = debayer_bggr8(&plane, 4, 4, 4, 1, 5);
        assert_eq!(img.width, 2);
        assert_eq!(img.height, 2);
        for chunk in img.data.chunks(3) {
            assert_eq!(chunk, &[35, 20, 5]);
        }
    }

    #[test]
    fn dimensions_match_property_5() {
        let plane = vec![0u8; (64 * 48) as usize];
        let img = debayer_bggr8(&plane, 64, 48, 64, 2, 0);
        assert_eq!(img.width, 64 / 4);
        assert_eq!(img.height, 48 / 4);
    }

    #[test]
    fn black_level_monotonicity() {
        let plane = vec![100u8; 16];
        let low = debayer_bggr8(&plane, 4, 4, 4, 1, 0);
        let high = debayer_bggr8(&plane, 4, 4, 4, 1, 50);
        for (lo, hi) in low.data.iter().zip(high.data.iter()) {
            assert!(hi <= lo);
        }
    }

    #[test]
    fn clamp_skip_applies_plus_one_quirk() {
        assert_eq!(clamp_skip(640, 320), 2);
        assert_eq!(clamp_skip(4000, 320), 3);
        assert_eq!(clamp_skip(0, 320), 1);
    }
}
