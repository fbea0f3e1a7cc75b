use cirrus::core::flags::{Landsat8Flags, MerisL1Flags};
use cirrus::core::meris::{MerisParams, MerisProcessor, MerisScene};
use cirrus::core::postprocess::{PostProcessParams, PostProcessor};
use cirrus::core::MerisAuxData;
use cirrus::types::{meris_band::*, FlagImage, MerisResolution, MERIS_NUM_BANDS};
use ndarray::Array2;
use std::sync::Arc;
use std::time::Instant;

/// 30x22 scene with ragged edge blocks, a land patch and scattered bright pixels
fn mixed_scene() -> MerisScene {
    let (rows, cols) = (30, 22);
    let mut scene = MerisScene::new(rows, cols);
    for y in 0..rows {
        for x in 0..cols {
            scene.sza[[y, x]] = 25.0 + y as f32;
            scene.vza[[y, x]] = 5.0 + 0.5 * x as f32;
            scene.saa[[y, x]] = 140.0;
            scene.vaa[[y, x]] = 100.0 + 3.0 * x as f32;
            scene.ecmwf_pressure[[y, x]] = 1010.0;
            scene.wind_u[[y, x]] = 3.0;
            scene.wind_v[[y, x]] = -2.0;
            scene.detector[[y, x]] = (x * 40) as u16;

            let rho = if (x * 7 + y * 3) % 11 == 0 { 0.5 } else { 0.04 + 0.001 * x as f32 };
            for b in 0..MERIS_NUM_BANDS {
                scene.rho_toa[[b, y, x]] = rho;
            }
            scene.rho_toa[[BB760, y, x]] = 0.62 * rho;
            if x < 10 && y > 8 {
                scene.l1_flags[[y, x]] = 1 << MerisL1Flags::LAND_OCEAN;
            }
        }
    }
    scene.l1_flags[[0, 21]] = 1 << MerisL1Flags::INVALID;
    scene
}

#[test]
fn test_meris_parallel_matches_sequential() {
    let _ = env_logger::builder().is_test(true).try_init();
    let aux = Arc::new(MerisAuxData::synthetic(MerisResolution::Reduced).expect("Failed to build calibration"));
    let mut params = MerisParams {
        block_size: 4,
        ..Default::default()
    };
    params.gaseous.export_transmittance = true;
    params.rayleigh.export_terms = true;
    let processor = MerisProcessor::with_params(aux, params).expect("Failed to create processor");
    let scene = mixed_scene();

    let start = Instant::now();
    let sequential = processor.process_scene(&scene).expect("Failed to process scene");
    let sequential_time = start.elapsed();
    let start = Instant::now();
    let parallel = processor.process_scene_parallel(&scene).expect("Failed to process scene");
    let parallel_time = start.elapsed();
    println!("sequential {:?}, parallel {:?}", sequential_time, parallel_time);

    assert_eq!(sequential.rho_ng, parallel.rho_ng);
    assert_eq!(sequential.brr, parallel.brr);
    assert_eq!(sequential.brr_smile, parallel.brr_smile);
    assert_eq!(sequential.cloud_flags, parallel.cloud_flags);
    assert_eq!(sequential.gas_flags, parallel.gas_flags);
    assert_eq!(sequential.land_flags, parallel.land_flags);
    assert_eq!(sequential.rayleigh_flags, parallel.rayleigh_flags);
    assert_eq!(sequential.surface_pressure, parallel.surface_pressure);
    assert_eq!(sequential.gas_transmittance, parallel.gas_transmittance);
    assert_eq!(sequential.rayleigh_reflectance, parallel.rayleigh_reflectance);
}

#[test]
fn test_post_process_parallel_matches_sequential() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (rows, cols) = (37, 41);
    let flags = FlagImage::from_shape_fn((rows, cols), |(y, x)| {
        let mut f = 0;
        if (x * 13 + y * 5) % 17 == 0 {
            f |= (1 << Landsat8Flags::CLOUD_SURE) | (1 << Landsat8Flags::CLOUD_SHIMEZ);
        }
        if (x + y) % 9 == 0 {
            f |= 1 << Landsat8Flags::SNOW_ICE;
        }
        f
    });
    let water_fraction = Array2::from_shape_fn((rows, cols), |(y, x)| if x + y / 3 < 20 { 0u8 } else { 100 });

    let processor = PostProcessor::with_params(PostProcessParams {
        refine_coastlines: true,
        tile_size: 8,
        ..Default::default()
    });
    let sequential = processor
        .post_process(&flags, Some(&water_fraction))
        .expect("Failed to post-process");
    let parallel = processor
        .post_process_parallel(&flags, Some(&water_fraction))
        .expect("Failed to post-process");
    assert_eq!(sequential, parallel);
    assert!(sequential
        .iter()
        .any(|&f| Landsat8Flags(f).contains(Landsat8Flags::CLOUD_BUFFER)));
}
