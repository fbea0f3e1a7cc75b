use cirrus::core::decision::{CloudTests, DecisionTable};
use cirrus::core::flags::{CloudFlags, GasFlags, LandFlags, MerisL1Flags};
use cirrus::core::meris::{MerisParams, MerisProcessor, MerisScene};
use cirrus::core::postprocess::PostProcessParams;
use cirrus::core::MerisAuxData;
use cirrus::types::{meris_band::*, MerisResolution, Rect, BAD_VALUE, MERIS_NUM_BANDS};
use ndarray::{Array2, Axis};
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn processor() -> MerisProcessor {
    let aux = MerisAuxData::synthetic(MerisResolution::Reduced).expect("Failed to build calibration");
    MerisProcessor::new(Arc::new(aux)).expect("Failed to create processor")
}

/// Water scene with flat reflectance and an O2 band ratio of 0.6
fn water_scene(rows: usize, cols: usize, rho: f32) -> MerisScene {
    let mut scene = MerisScene::new(rows, cols);
    scene.sza.fill(30.0);
    scene.vza.fill(10.0);
    scene.saa.fill(120.0);
    scene.vaa.fill(120.0);
    scene.ecmwf_pressure.fill(1013.0);
    scene.rho_toa.fill(rho);
    scene.rho_toa.index_axis_mut(Axis(0), BB760).fill(0.6 * rho);
    scene
}

fn set_pixel(scene: &mut MerisScene, x: usize, y: usize, rho: f32) {
    for b in 0..MERIS_NUM_BANDS {
        scene.rho_toa[[b, y, x]] = rho;
    }
    scene.rho_toa[[BB760, y, x]] = 0.6 * rho;
}

#[test]
fn test_clear_land_block() {
    init_logging();
    let mut scene = water_scene(4, 4, 0.05);
    scene.l1_flags.fill(1 << MerisL1Flags::LAND_OCEAN);

    let out = processor().process_scene(&scene).expect("Failed to process scene");

    for y in 0..4 {
        for x in 0..4 {
            assert!(!CloudFlags(out.cloud_flags[[y, x]]).contains(CloudFlags::CLOUD));
            assert!(GasFlags(out.gas_flags[[y, x]]).contains(GasFlags::DO_CORRECT));
            assert!(LandFlags(out.land_flags[[y, x]]).contains(LandFlags::LANDCONS));
            // Ozone absorption only increases reflectance
            assert!(out.rho_ng[[BB560, y, x]] > scene.rho_toa[[BB560, y, x]]);
            assert!(out.brr[[BB412, y, x]] < out.rho_ng[[BB412, y, x]]);
            assert_ne!(out.brr_smile[[BB412, y, x]], BAD_VALUE);
        }
    }
}

#[test]
fn test_cloudy_block_is_not_corrected() {
    init_logging();
    let scene = water_scene(4, 4, 0.6);
    let out = processor().process_scene(&scene).expect("Failed to process scene");

    for y in 0..4 {
        for x in 0..4 {
            let cloud = CloudFlags(out.cloud_flags[[y, x]]);
            assert!(cloud.contains(CloudFlags::CLOUD));
            assert!(cloud.contains(CloudFlags::BRIGHT));
            assert_eq!(out.land_flags[[y, x]], 0);
            assert!(!GasFlags(out.gas_flags[[y, x]]).contains(GasFlags::DO_CORRECT));
            for b in 0..MERIS_NUM_BANDS {
                assert_eq!(out.rho_ng[[b, y, x]], BAD_VALUE);
                assert_eq!(out.brr[[b, y, x]], BAD_VALUE);
            }
            assert!(out.surface_pressure[[y, x]] >= 0.0);
        }
    }
}

#[test]
fn test_invalid_corner_does_not_spoil_block() {
    init_logging();
    let mut scene = water_scene(4, 4, 0.05);
    scene.l1_flags.fill(1 << MerisL1Flags::LAND_OCEAN);
    scene.l1_flags[[0, 0]] |= 1 << MerisL1Flags::INVALID;
    scene.l1_flags[[3, 2]] |= 1 << MerisL1Flags::INVALID;

    let out = processor().process_scene(&scene).expect("Failed to process scene");

    for &(x, y) in &[(0, 0), (2, 3)] {
        assert_eq!(out.cloud_flags[[y, x]], 0);
        assert_eq!(out.land_flags[[y, x]], 0);
        for b in 0..MERIS_NUM_BANDS {
            assert_eq!(out.rho_ng[[b, y, x]], BAD_VALUE);
            assert_eq!(out.brr[[b, y, x]], BAD_VALUE);
            assert_eq!(out.brr_smile[[b, y, x]], BAD_VALUE);
        }
    }
    assert_ne!(out.brr[[BB412, 1, 1]], BAD_VALUE);
    assert_ne!(out.rho_ng[[BB412, 0, 1]], BAD_VALUE);
}

#[test]
fn test_cloud_buffer_ring() {
    init_logging();
    let mut scene = water_scene(12, 12, 0.05);
    set_pixel(&mut scene, 6, 6, 0.6);

    let p = processor();
    let mut out = p.process_scene(&scene).expect("Failed to process scene");
    p.buffer_clouds(
        &mut out,
        PostProcessParams {
            cloud_buffer_width: 2,
            ..Default::default()
        },
    )
    .expect("Failed to buffer clouds");

    for y in 0..12 {
        for x in 0..12 {
            let flags = CloudFlags(out.cloud_flags[[y, x]]);
            let d = (x as i64 - 6).abs().max((y as i64 - 6).abs());
            assert_eq!(flags.contains(CloudFlags::CLOUD), d == 0, "cloud at ({}, {})", x, y);
            assert_eq!(
                flags.contains(CloudFlags::CLOUD_BUFFER),
                (1..=2).contains(&d),
                "buffer at ({}, {})",
                x,
                y
            );
        }
    }
}

#[test]
fn test_glint_override_over_water() {
    init_logging();
    let mut scene = water_scene(4, 4, 0.05);
    scene.rho_toa.index_axis_mut(Axis(0), BB665).fill(0.2);
    scene.rho_toa.index_axis_mut(Axis(0), BB865).fill(0.1);

    let p = processor();

    // Calm sea: weak glint, the lenient water test decides
    let calm = p.process_scene(&scene).expect("Failed to process scene");
    let flags = LandFlags(calm.land_flags[[1, 1]]);
    assert!(!flags.contains(LandFlags::MEGLINT));
    assert!(flags.contains(LandFlags::LANDCONS));

    // Wind blowing towards the sun azimuth: strong glint, the island test decides
    let azimuth = 120.0f32.to_radians();
    scene.wind_u.fill(5.0 * azimuth.sin());
    scene.wind_v.fill(5.0 * azimuth.cos());
    let windy = p.process_scene(&scene).expect("Failed to process scene");
    let flags = LandFlags(windy.land_flags[[1, 1]]);
    assert!(flags.contains(LandFlags::MEGLINT));
    assert!(!flags.contains(LandFlags::ISLAND));
    assert!(!flags.contains(LandFlags::LANDCONS));
}

#[test]
fn test_exported_terms() {
    init_logging();
    let mut scene = water_scene(4, 4, 0.05);
    scene.l1_flags.fill(1 << MerisL1Flags::LAND_OCEAN);
    let mut params = MerisParams::default();
    params.gaseous.export_transmittance = true;
    params.rayleigh.export_terms = true;
    let aux = MerisAuxData::synthetic(MerisResolution::Reduced).expect("Failed to build calibration");
    let p = MerisProcessor::with_params(Arc::new(aux), params).expect("Failed to create processor");

    let out = p.process_scene(&scene).expect("Failed to process scene");
    let transmittance = out.gas_transmittance.expect("Transmittance not exported");
    let reflectance = out.rayleigh_reflectance.expect("Rayleigh reflectance not exported");

    let t = transmittance[[BB560, 2, 2]];
    assert!(t > 0.0 && t < 1.0);
    approx::assert_relative_eq!(
        out.rho_ng[[BB560, 2, 2]],
        scene.rho_toa[[BB560, 2, 2]] / t,
        max_relative = 1e-5
    );
    // One geometry per block
    assert_eq!(reflectance[[BB412, 0, 0]], reflectance[[BB412, 3, 3]]);
    assert!(reflectance[[BB412, 0, 0]] > reflectance[[BB865, 0, 0]]);
}

#[test]
fn test_cloudy_corner_scales_block_pressure() {
    init_logging();
    // Land pixels are cloudy exactly when bright
    let mut aux = MerisAuxData::synthetic(MerisResolution::Reduced).expect("Failed to build calibration");
    let mut entries = [false; 256];
    for (i, entry) in entries.iter_mut().enumerate() {
        *entry = CloudTests::from_index(i as u8).bright;
    }
    aux.land_decision = DecisionTable::from_entries(entries);
    let mut params = MerisParams::default();
    params.rayleigh.export_terms = true;
    let p = MerisProcessor::with_params(Arc::new(aux), params).expect("Failed to create processor");

    let mut scene = water_scene(2, 2, 0.05);
    scene.l1_flags.fill(1 << MerisL1Flags::LAND_OCEAN);
    scene.ecmwf_pressure.fill(800.0);
    set_pixel(&mut scene, 0, 0, 0.6);
    let rect = Rect::new(0, 0, 2, 2);
    let clear = p.compute_block(&scene, &rect);

    scene.cloud_top_pressure = Some(Array2::from_elem((2, 2), 500.0));
    let cloudy = p.compute_block(&scene, &rect);

    let corner = &cloudy.cloud[0];
    assert!(corner.flags.contains(CloudFlags::CLOUD));
    assert!(!cloudy.cloud[1].flags.contains(CloudFlags::CLOUD));
    let retrieved = corner.surface_pressure;
    assert!((retrieved - 800.0).abs() > 1.0);

    // Without cloud-top pressure the block runs at the ECMWF pressure
    let clear_tau = clear.rayleigh.terms.expect("Rayleigh terms not exported").tau[BB412];
    let cloudy_tau = cloudy.rayleigh.terms.expect("Rayleigh terms not exported").tau[BB412];
    approx::assert_relative_eq!(cloudy_tau, clear_tau * 500.0 / retrieved, max_relative = 1e-9);
}

#[test]
fn test_smile_can_be_disabled() {
    init_logging();
    let mut scene = water_scene(4, 4, 0.05);
    scene.l1_flags.fill(1 << MerisL1Flags::LAND_OCEAN);
    let params = MerisParams {
        apply_smile: false,
        ..Default::default()
    };
    let aux = MerisAuxData::synthetic(MerisResolution::Reduced).expect("Failed to build calibration");
    let p = MerisProcessor::with_params(Arc::new(aux), params).expect("Failed to create processor");

    let out = p.process_scene(&scene).expect("Failed to process scene");
    assert_eq!(out.brr, out.brr_smile);
}
