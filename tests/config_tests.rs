// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the INI config loader (testable property 7, S6).

use megapixels_engine::config;
use megapixels_engine::errors::ConfigError;

#[test]
fn full_device_config_round_trips() {
    let ini = "\
; megapixels config
[device]
csi=sun6i-csi
make=PINE64
model=PinePhone

[rear]
driver=ov5640
width=2592
height=1944
rate=15
fmt=BGGR8
rotate=90
colormatrix=1,0,0,0,1,0,0,0,1
forwardmatrix=9,8,7,6,5,4,3,2,1
whitelevel=255
blacklevel=16
focallength=3.38
cropfactor=7.45
fnumber=2.2
iso-min=100
iso-max=1600

[front]
driver=gc2145
width=1600
height=1200
rate=30
fmt=BGGR8
";
    let parsed = config::parse(ini).expect("well-formed config should parse");

    assert_eq!(parsed.device.csi, "sun6i-csi");
    assert_eq!(parsed.device.make, "PINE64");
    assert_eq!(parsed.device.model, "PinePhone");

    assert_eq!(parsed.rear.driver, "ov5640");
    assert_eq!(parsed.rear.width, 2592);
    assert_eq!(parsed.rear.height, 1944);
    assert_eq!(parsed.rear.rate, 15);
    assert_eq!(parsed.rear.rotate, 90);
    assert_eq!(
        parsed.rear.color_matrix,
        Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    );
    assert_eq!(
        parsed.rear.forward_matrix,
        Some([9.0, 8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0])
    );
    assert_eq!(parsed.rear.white_level, Some(255));
    assert_eq!(parsed.rear.black_level, Some(16));
    assert_eq!(parsed.rear.iso_min, Some(100));
    assert_eq!(parsed.rear.iso_max, Some(1600));

    assert_eq!(parsed.front.driver, "gc2145");
    assert_eq!(parsed.front.width, 1600);
}

// S6: unknown key in [rear] fails fast naming the offending section and key.
#[test]
fn s6_unknown_key_reports_section_and_key() {
    let ini = "[rear]\ndriver=ov5640\ngamma=2.2\n";
    let err = config::parse(ini).expect_err("unknown key must fail");
    match err {
        ConfigError::Malformed { section, key } => {
            assert_eq!(section, "rear");
            assert_eq!(key, "gamma");
        }
        other => panic!("expected Malformed, got {other:?}"),
    }
}
