//! End-to-end behaviour of the exporter against in-memory sinks.

use approx::assert_relative_eq;
use proptest::prelude::*;
use strata_gcode::units::filament_area;
use strata_gcode::{
    ExtruderConfig, FlowCompensation, GcodeError, GcodeExport, GcodeFlavor, PrinterProfile,
    RetractionConfig,
};
use strata_math::{IntPoint, IntPoint3};
use strata_slicer::PrintFeatureType;

fn text(export: &GcodeExport<Vec<u8>>) -> String {
    String::from_utf8(export.get_ref().clone()).unwrap()
}

fn two_extruder_profile() -> PrinterProfile {
    let extruder = |n: usize| ExtruderConfig {
        filament_diameter: 1.75,
        start_code: format!(";START_E{n}"),
        end_code: format!(";END_E{n}"),
        ..Default::default()
    };
    PrinterProfile {
        extruders: vec![extruder(0), extruder(1)],
        ..PrinterProfile::generic()
    }
}

fn started(profile: PrinterProfile) -> GcodeExport<Vec<u8>> {
    let mut export = GcodeExport::new(Vec::new(), profile).unwrap();
    export.start_extruder(0).unwrap();
    export
}

#[test]
fn switch_extruder_accounts_filament_per_extruder() {
    let mut export = started(two_extruder_profile());
    let area = filament_area(1.75);
    export.travel_xy(IntPoint::new(0, 0), 150.0).unwrap();
    // 20 mm of travel with half the filament area per mm: 10 mm of filament
    export
        .extrude_xy(IntPoint::new(20_000, 0), 30.0, area / 2.0, PrintFeatureType::OuterWall, false)
        .unwrap();
    assert_relative_eq!(export.current_e_value(), 10.0, epsilon = 1e-9);

    let switch = RetractionConfig {
        distance: 2.0,
        ..RetractionConfig::extruder_switch()
    };
    export.switch_extruder(1, &switch).unwrap();

    let out = text(&export);
    let retracts: Vec<&str> = out
        .lines()
        .filter(|line| line.starts_with("G1 F") && !line.contains('X'))
        .collect();
    assert_eq!(retracts, vec!["G1 F1200 E8"]);
    assert_eq!(out.matches(";START_E0\n").count(), 1);
    assert_eq!(out.matches(";START_E1\n").count(), 1);
    assert_eq!(out.matches(";END_E0\n").count(), 1);
    assert!(out.find(";END_E0").unwrap() < out.find("T1\n").unwrap());
    assert!(out.find("T1\n").unwrap() < out.find(";START_E1").unwrap());

    let stored = export.extruder(0).unwrap().total_filament_mm3;
    assert_relative_eq!(stored, 10.0 * area, epsilon = 1e-9);
    assert_relative_eq!(export.total_filament_used(0).unwrap(), 10.0 * area, epsilon = 1e-9);
    assert_eq!(export.total_filament_used(1).unwrap(), 0.0);
    assert_eq!(export.current_extruder(), Some(1));
    assert!(export.is_retracted());
}

#[test]
fn full_field_set_after_switch() {
    let mut export = started(two_extruder_profile());
    export.set_layer_z(200);
    export.travel_xy(IntPoint::new(10_000, 10_000), 150.0).unwrap();
    export.switch_extruder(1, &RetractionConfig::extruder_switch()).unwrap();
    export.unretract_and_prime().unwrap();
    let before = text(&export).len();
    export
        .extrude_xy(IntPoint::new(20_000, 10_000), 150.0, 0.1, PrintFeatureType::Skin, false)
        .unwrap();
    let out = text(&export);
    let line = &out[before..];
    assert!(line.starts_with("G1 F9000 X20 Y10 Z0.2 E"), "{line}");
}

#[test]
fn retract_is_idempotent_without_force() {
    let mut export = started(PrinterProfile::generic());
    let config = RetractionConfig::default();
    export.retract(&config, false, false).unwrap();
    let once = text(&export);
    let e = export.current_e_value();
    let amount = export.extruder(0).unwrap().retracted_amount;

    export.retract(&config, false, false).unwrap();
    assert_eq!(text(&export), once);
    assert_eq!(export.current_e_value(), e);
    assert_eq!(export.extruder(0).unwrap().retracted_amount, amount);
    assert!(once.ends_with("G1 F2700 E-5\n"));
}

#[test]
fn forced_retract_only_deepens() {
    let mut export = started(PrinterProfile::generic());
    export.retract(&RetractionConfig::default(), false, false).unwrap();
    let shallow = RetractionConfig {
        distance: 2.0,
        ..Default::default()
    };
    let before = text(&export);
    export.retract(&shallow, true, false).unwrap();
    assert_eq!(text(&export), before);

    let deep = RetractionConfig {
        distance: 8.0,
        ..Default::default()
    };
    export.retract(&deep, true, false).unwrap();
    assert!(text(&export).ends_with("G1 F2700 E-8\n"));

    export.unretract_and_prime().unwrap();
    assert!(text(&export).ends_with("G1 F2700 E0\n"));
    assert_eq!(export.current_e_value(), 0.0);
}

#[test]
fn unretract_while_primed_writes_nothing() {
    let mut export = started(PrinterProfile::generic());
    export
        .extrude_xy(IntPoint::new(5_000, 0), 30.0, 0.05, PrintFeatureType::Infill, false)
        .unwrap();
    let before = text(&export);
    let e = export.current_e_value();
    export.unretract_and_prime().unwrap();
    assert_eq!(text(&export), before);
    assert_eq!(export.current_e_value(), e);
}

#[test]
fn repeated_settings_are_elided() {
    let mut export = started(PrinterProfile::generic());
    let start = text(&export).len();
    export.travel_xy(IntPoint::new(10_000, 0), 150.0).unwrap();
    export.travel_xy(IntPoint::new(20_000, 0), 150.0).unwrap();
    export.travel_xy(IntPoint::new(20_000, 0), 150.0).unwrap();
    export.write_temperature_command(0, 200.0, false).unwrap();
    export.write_temperature_command(0, 200.0, false).unwrap();
    export.write_fan_command(100.0).unwrap();
    export.write_fan_command(100.0).unwrap();
    export.write_print_acceleration(1500.0).unwrap();
    export.write_print_acceleration(1500.0).unwrap();
    export.write_jerk(10.0).unwrap();
    export.write_jerk(10.0).unwrap();
    export.write_bed_temperature(60.0, false).unwrap();
    export.write_bed_temperature(60.0, false).unwrap();

    assert_eq!(
        &text(&export)[start..],
        "G0 F9000 X10 Y0 Z0\nG0 X20\nM104 S200\nM106 S255\nM204 S1500\nM205 X10 Y10\nM140 S60\n"
    );
}

#[test]
fn waiting_temperature_is_always_written() {
    let mut export = started(PrinterProfile::generic());
    export.write_temperature_command(0, 200.0, true).unwrap();
    export.write_temperature_command(0, 200.0, true).unwrap();
    assert_eq!(text(&export).matches("M109 S200\n").count(), 2);
    assert!(export.extruder(0).unwrap().waited_for_temperature);
}

#[test]
fn z_hop_round_trip() {
    let mut export = started(PrinterProfile::generic());
    export.set_layer_z(300);
    export.travel_xy(IntPoint::new(10_000, 10_000), 150.0).unwrap();
    let position = export.position();
    let before = text(&export).len();

    export.z_hop_start(500).unwrap();
    assert_eq!(export.position().z, 800);
    assert_eq!(export.state().z_hop_offset, 500);
    // a smaller hop while hopped changes nothing
    export.z_hop_start(200).unwrap();
    assert_eq!(export.position().z, 800);
    export.z_hop_end().unwrap();

    assert_eq!(export.position(), position);
    assert_eq!(export.state().z_hop_offset, 0);
    let hop = &text(&export)[before..];
    assert_eq!(hop, "G0 F600 Z0.8\nG0 Z0.3\n");
}

#[test]
fn travel_keeps_hop_and_extrude_ends_it() {
    let mut export = started(PrinterProfile::generic());
    export.set_layer_z(200);
    export.travel_xy(IntPoint::new(0, 0), 150.0).unwrap();
    export.z_hop_start(400).unwrap();
    export.travel_xy(IntPoint::new(10_000, 0), 150.0).unwrap();
    assert_eq!(export.position(), IntPoint3::new(10_000, 0, 600));

    export
        .extrude_xy(IntPoint::new(20_000, 0), 30.0, 0.05, PrintFeatureType::InnerWall, false)
        .unwrap();
    assert_eq!(export.position(), IntPoint3::new(20_000, 0, 200));
    assert_eq!(export.state().z_hop_offset, 0);
    let out = text(&export);
    assert!(out.contains("G0 F600 Z0.6\nG0 F9000 X10\nG0 F600 Z0.2\nG1 F1800 X20 E"));
}

#[test]
fn reset_while_retracted_is_rejected() {
    let mut export = started(PrinterProfile::generic());
    export.retract(&RetractionConfig::default(), false, false).unwrap();
    let err = export.reset_extrusion_value().unwrap_err();
    assert!(matches!(err, GcodeError::ResetWhileRetracted(0)));
    assert!(!err.is_config_fault());

    export.unretract_and_prime().unwrap();
    export.reset_extrusion_value().unwrap();
    assert!(text(&export).ends_with("G92 E0\n"));
}

#[test]
fn out_of_range_extruder_is_config_fault() {
    let mut export = GcodeExport::new(Vec::new(), PrinterProfile::generic()).unwrap();
    let err = export.start_extruder(3).unwrap_err();
    assert!(err.is_config_fault());
    assert!(matches!(
        err,
        GcodeError::ExtruderOutOfRange { index: 3, count: 1 }
    ));
    assert!(export.write_temperature_command(1, 200.0, false).is_err());
}

#[test]
fn firmware_retraction_uses_g10_g11() {
    let mut export = started(PrinterProfile::voron_24());
    export
        .extrude_xy(IntPoint::new(5_000, 0), 30.0, 0.05, PrintFeatureType::Infill, false)
        .unwrap();
    let e = export.current_e_value();
    let config = export.profile().retraction.clone();
    export.retract(&config, false, false).unwrap();
    export.unretract_and_prime().unwrap();
    let out = text(&export);
    assert!(out.ends_with("G10\nG11\n"));
    assert_eq!(export.current_e_value(), e);
}

#[test]
fn bfb_batches_moves_until_flush() {
    let mut export = started(PrinterProfile::bfb_3000());
    export.set_layer_z(300);
    export.travel_xy(IntPoint::new(10_000, 0), 150.0).unwrap();
    export
        .extrude_xy(IntPoint::new(20_000, 0), 20.0, 0.2, PrintFeatureType::OuterWall, false)
        .unwrap();
    export
        .extrude_xy(IntPoint::new(30_000, 0), 20.0, 0.2, PrintFeatureType::OuterWall, false)
        .unwrap();
    let pending = text(&export);
    // 0.2 mm³/mm at 20 mm/s is 240 mm³/min, 4 mm³ per motor revolution
    assert!(pending.contains("G1 X10 Y0 Z0.3 F9000\nM108 S60\nM101\n"), "{pending}");
    assert!(!pending.contains("G1 X20"));

    export.finalize("").unwrap();
    let out = text(&export);
    let x30 = out.find("G1 X30 Y0 Z0.3").unwrap();
    assert!(out.find("G1 X20 Y0 Z0.3").unwrap() < x30);
    assert!(x30 < out.find("M107").unwrap());
}

#[test]
fn mach3_uses_axis_per_extruder() {
    let mut profile = two_extruder_profile();
    profile.flavor = GcodeFlavor::Mach3;
    let mut export = started(profile);
    export.switch_extruder(1, &RetractionConfig::extruder_switch()).unwrap();
    export.unretract_and_prime().unwrap();
    export
        .extrude_xy(IntPoint::new(5_000, 0), 30.0, 0.05, PrintFeatureType::Infill, false)
        .unwrap();
    let out = text(&export);
    assert!(out.contains("G92 B0\n"));
    let last = out.lines().last().unwrap();
    assert!(last.contains(" B"), "{last}");
    assert!(!last.contains(" E"));
}

#[test]
fn bounding_box_covers_emitted_moves() {
    let mut export = started(PrinterProfile::generic());
    export.set_layer_z(200);
    export.travel_xy(IntPoint::new(-5_000, 3_000), 150.0).unwrap();
    export
        .extrude_xy(IntPoint::new(40_000, 25_000), 30.0, 0.05, PrintFeatureType::Skin, false)
        .unwrap();
    let bounds = export.bounding_box();
    assert_eq!(bounds.min, IntPoint3::new(-5_000, 3_000, 200));
    assert_eq!(bounds.max, IntPoint3::new(40_000, 25_000, 200));
}

#[test]
fn switch_under_firmware_retraction_writes_swap_retraction() {
    let profile = PrinterProfile {
        flavor: GcodeFlavor::Repetier,
        firmware_retraction: true,
        ..two_extruder_profile()
    };
    let mut export = started(profile);
    export
        .extrude_xy(IntPoint::new(10_000, 0), 30.0, 0.1, PrintFeatureType::OuterWall, false)
        .unwrap();
    export.retract(&RetractionConfig::default(), false, false).unwrap();
    // a forced plain retraction can't deepen a firmware retraction
    export.retract(&RetractionConfig::extruder_switch(), true, false).unwrap();
    export.switch_extruder(1, &RetractionConfig::extruder_switch()).unwrap();

    let out = text(&export);
    let tail = &out[out.find("G10\n").unwrap()..];
    assert_eq!(tail, "G10\nG10 S1\nG92 E0\n;END_E0\nT1\nG92 E0\n;START_E1\n");
}

#[test]
fn change_extruder_uses_profile_switch_retraction() {
    let mut export = started(two_extruder_profile());
    export.change_extruder(1).unwrap();
    export.unretract_and_prime().unwrap();
    export.change_extruder(0).unwrap();
    let before = text(&export).len();
    // the rebase happened while retracted, so the prime returns to the switch depth
    export.unretract_and_prime().unwrap();

    let out = text(&export);
    assert!(out.starts_with("G92 E0\n;START_E0\nG1 F1200 E-16\nG92 E0\n;END_E0\nT1\n"));
    assert!(out.contains("G1 F1200 E-16\nG92 E0\n;END_E1\nT0\n"), "{out}");
    assert_eq!(&out[before..], "G1 F1200 E16\n");
    assert_eq!(export.current_e_value(), 16.0);
    assert_eq!(export.total_filament_used(0).unwrap(), 0.0);
}

#[test]
fn flow_compensation_offset_is_capped() {
    let mut profile = PrinterProfile::generic();
    profile.flavor = GcodeFlavor::MarlinVolumetric;
    profile.flow_compensation = FlowCompensation {
        max_extrusion_offset: 4.0,
        extrusion_offset_factor: 0.1,
    };
    let mut export = started(profile);
    let before = text(&export).len();
    // 100 mm/s × 0.5 mm³/mm × 0.1 asks for 5, capped at 4
    export
        .extrude_xy(IntPoint::new(10_000, 0), 100.0, 0.5, PrintFeatureType::Infill, true)
        .unwrap();
    assert_eq!(
        &text(&export)[before..],
        ";FLOW_RATE_COMPENSATED_OFFSET = 4\nG1 F6000 X10 Y0 Z0 E9\n"
    );
    assert_relative_eq!(export.total_filament_used(0).unwrap(), 5.0);
}

#[test]
fn dry_extrusion_moves_without_e() {
    let mut export = started(PrinterProfile::generic());
    export.set_layer_z(200);
    export.travel_xy(IntPoint::new(0, 0), 150.0).unwrap();
    export.retract(&RetractionConfig::default(), false, false).unwrap();
    export.z_hop_start(400).unwrap();
    let before = text(&export).len();

    export
        .write_dry_extrusion_xy(IntPoint::new(10_000, 0), 10.0, PrintFeatureType::Reinforcement)
        .unwrap();
    assert_eq!(&text(&export)[before..], "G0 Z0.2\nG1 X10\n");
    assert_eq!(export.position(), IntPoint3::new(10_000, 0, 200));
    assert_eq!(export.current_e_value(), -5.0);
    assert!(export.is_retracted());

    let err = GcodeExport::new(Vec::new(), PrinterProfile::generic())
        .unwrap()
        .write_dry_extrusion_xy(IntPoint::new(0, 0), 10.0, PrintFeatureType::Reinforcement)
        .unwrap_err();
    assert!(matches!(err, GcodeError::ExtruderNotStarted));
}

#[test]
fn chamber_fan_is_elided_separately_from_print_fan() {
    let mut export = started(PrinterProfile::voron_24());
    let start = text(&export).len();
    export.write_chamber_fan_command(50.0).unwrap();
    export.write_chamber_fan_command(50.0).unwrap();
    export.write_fan_command(50.0).unwrap();
    export.write_chamber_fan_command(0.0).unwrap();
    assert_eq!(&text(&export)[start..], "M106 S127.5 P2\nM106 S127.5\nM107 P2\n");
    assert_eq!(export.state().chamber_fan_speed, Some(0.0));

    let mut export = started(PrinterProfile::generic());
    let start = text(&export).len();
    export.write_chamber_fan_command(100.0).unwrap();
    assert_eq!(text(&export).len(), start);
}

#[test]
fn fiber_cut_and_prime_write_extruder_code() {
    let mut profile = two_extruder_profile();
    profile.extruders[1].fiber_cut_code = "M280 P0 S90".into();
    profile.extruders[1].fiber_prime_code = "G1 E2 F300".into();
    let mut export = started(profile);

    export.write_fiber_cut().unwrap();
    export.write_fiber_prime().unwrap();
    let before = text(&export).len();

    export.switch_extruder(1, &RetractionConfig::extruder_switch()).unwrap();
    export.travel_xy(IntPoint::new(5_000, 5_000), 150.0).unwrap();
    export.write_fiber_cut().unwrap();
    export.travel_xy(IntPoint::new(6_000, 5_000), 150.0).unwrap();
    export.write_fiber_prime().unwrap();

    let out = text(&export);
    assert!(out[..before].ends_with(";START_E0\n"));
    assert!(out.ends_with(
        "G0 F9000 X5 Y5 Z0\nM280 P0 S90\nG0 F9000 X6 Y5 Z0\nG1 E2 F300\n"
    ));
}

#[derive(Debug, Clone)]
enum Step {
    Extrude { dx: i64, flow: f64 },
    Retract { distance: f64, force: bool },
    Unretract,
    Coast(f64),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1i64..50_000, 0.0f64..2.0).prop_map(|(dx, flow)| Step::Extrude { dx, flow }),
        (0.0f64..10.0, any::<bool>()).prop_map(|(distance, force)| Step::Retract { distance, force }),
        Just(Step::Unretract),
        (0.0f64..1.0).prop_map(Step::Coast),
    ]
}

proptest! {
    #[test]
    fn filament_total_never_decreases(steps in prop::collection::vec(step(), 1..60)) {
        let mut export = started(PrinterProfile::generic());
        let mut x = 0;
        let mut last = export.total_filament_used(0).unwrap();
        for step in steps {
            match step {
                Step::Extrude { dx, flow } => {
                    export.unretract_and_prime().unwrap();
                    x += dx;
                    export
                        .extrude_xy(IntPoint::new(x, 0), 40.0, flow, PrintFeatureType::Infill, false)
                        .unwrap();
                }
                Step::Retract { distance, force } => {
                    let config = RetractionConfig { distance, ..Default::default() };
                    export.retract(&config, force, false).unwrap();
                }
                Step::Unretract => export.unretract_and_prime().unwrap(),
                Step::Coast(volume) => export.add_coasted_volume(volume).unwrap(),
            }
            let total = export.total_filament_used(0).unwrap();
            prop_assert!(total >= last - 1e-9, "{} < {}", total, last);
            last = total;
        }
    }
}
