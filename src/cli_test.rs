use super::*;
use crate::container::{ContainerKind, SampleEncoding};

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("iqtap").chain(args.iter().copied())).unwrap()
}

#[test]
fn test_defaults() {
    let cli = parse(&[]);
    assert_eq!(cli.device, "sim");
    assert_eq!(cli.frequency, 100e6);
    assert_eq!(cli.rate, 1e6);
    assert_eq!(cli.packet_size, 1024);
    assert_eq!(cli.buffer_size, 256);
    assert_eq!(cli.bins, 256);
    assert_eq!(cli.port, 8080);
    assert_eq!(cli.container(), ContainerKind::Wav);
    assert_eq!(cli.encoding(), SampleEncoding::F32);
    assert!(!cli.pause);
}

#[test]
fn test_short_flags() {
    let cli = parse(&["-f", "100.1e6", "-r", "1e6", "-g", "42", "--pcm16", "--pause", "-o", "out"]);
    assert_eq!(cli.frequency, 100.1e6);
    assert_eq!(cli.rate, 1e6);
    assert_eq!(cli.gain, 42.0);
    assert_eq!(cli.output, std::path::PathBuf::from("out"));
    assert!(cli.pause);
    assert_eq!(cli.encoding(), SampleEncoding::S16);
}

#[test]
fn test_container_selection() {
    assert_eq!(parse(&["--rf64"]).container(), ContainerKind::Rf64);
    assert_eq!(parse(&["--cf32"]).container(), ContainerKind::Cf32);
    // Raw cf32 is always f32 regardless of --pcm16 elsewhere.
    assert_eq!(parse(&["--cf32"]).encoding(), SampleEncoding::F32);
}

#[test]
fn test_conflicting_outputs_rejected() {
    assert!(Cli::try_parse_from(["iqtap", "--cf32", "--pcm16"]).is_err());
    assert!(Cli::try_parse_from(["iqtap", "--cf32", "--rf64"]).is_err());
}

#[test]
fn test_device_settings_mapping() {
    let cli = parse(&["--iq-swap", "--biastee", "--direct-samp", "2"]);
    let settings = cli.device_settings();
    assert!(settings.contains(&("iq_swap".into(), "true".into())));
    assert!(settings.contains(&("biastee".into(), "true".into())));
    assert!(settings.contains(&("direct_samp".into(), "2".into())));
    assert_eq!(settings.len(), 3);

    assert!(parse(&[]).device_settings().is_empty());
}

#[test]
fn test_rbw_overrides_bins() {
    let cli = parse(&["-r", "1e6", "--rbw", "3906.25", "--bins", "64"]);
    assert_eq!(cli.power_config().bins, 256);

    let cli = parse(&["--bins", "64"]);
    assert_eq!(cli.power_config().bins, 64);
}

#[test]
fn test_ring_elems_from_mib() {
    let cli = parse(&["--buffer-size", "1"]);
    assert_eq!(cli.ring_elems(), 1024 * 1024 / 4);
}

#[test]
fn test_file_config_carries_notimestamp() {
    let cli = parse(&["--notimestamp", "-o", "fixed"]);
    let cfg = cli.file_config();
    assert!(!cfg.timestamp);
    assert_eq!(cfg.output, std::path::PathBuf::from("fixed"));
}
