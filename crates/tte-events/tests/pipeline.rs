//! End-to-end: synthetic burst → Parquet → TimeSeries → bins → PHA files.

use approx::assert_relative_eq;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp, Uniform};
use tte_core::{Error, TimeInterval};
use tte_events::spectrum::read_pha_parquet;
use tte_events::{
    BinningMethod, EnergyBounds, EventStore, PolynomialOrder, TimeSeries, read_event_parquet,
    write_event_parquet,
};

const N_CHANNELS: usize = 8;

/// Homogeneous Poisson process of `rate` on `[start, stop)`, spread uniformly over channels.
fn poisson_events(rng: &mut StdRng, rate: f64, start: f64, stop: f64, channels: (usize, usize)) -> Vec<(f64, usize)> {
    let gap = Exp::new(rate).unwrap();
    let channel = Uniform::new_inclusive(channels.0, channels.1).unwrap();
    let mut t = start;
    let mut out = Vec::new();
    loop {
        t += gap.sample(rng);
        if t >= stop {
            return out;
        }
        out.push((t, channel.sample(rng)));
    }
}

fn burst_store() -> EventStore {
    let mut rng = StdRng::seed_from_u64(17);
    let mut events = poisson_events(&mut rng, 400.0, -50.0, 100.0, (0, N_CHANNELS - 1));
    events.extend(poisson_events(&mut rng, 1500.0, 0.0, 5.0, (2, 5)));
    events.sort_by(|a, b| a.0.total_cmp(&b.0));
    let (times, channels): (Vec<f64>, Vec<usize>) = events.into_iter().unzip();
    let edges: Vec<f64> = (0..=N_CHANNELS).map(|k| 10.0 * 2f64.powi(k as i32)).collect();
    EventStore::from_columns(times, channels, N_CHANNELS, Some(TimeInterval::new(-50.0, 100.0).unwrap()))
        .unwrap()
        .with_energy_bounds(EnergyBounds::from_edges(&edges).unwrap())
        .unwrap()
}

fn analysis() -> TimeSeries {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.parquet");
    write_event_parquet(&burst_store(), &path).unwrap();
    let store = read_event_parquet(&path).unwrap();
    let mut ts = TimeSeries::new("n3", store, PolynomialOrder::Fixed(1));
    ts.set_background_interval("-50--10, 30-100", true).unwrap();
    ts.set_active_time_interval("-5-20").unwrap();
    ts
}

#[test]
fn test_binning_is_deterministic() {
    for method in [
        BinningMethod::Constant { dt: 0.5 },
        BinningMethod::Significance { sigma: 8.0 },
        BinningMethod::BayesianBlocks { p0: 0.05 },
    ] {
        let mut a = analysis();
        let mut b = analysis();
        let first = a.create_time_bins(-5.0, 20.0, method).unwrap().clone();
        let second = b.create_time_bins(-5.0, 20.0, method).unwrap().clone();
        assert_eq!(first, second, "{method}");
        for pair in first.bins().windows(2) {
            assert!(pair[0].interval.start() < pair[0].interval.stop());
            assert!(pair[0].interval.stop() <= pair[1].interval.start());
        }
    }
}

#[test]
fn test_unknown_method_leaves_bins_untouched() {
    let mut ts = analysis();
    ts.create_time_bins(0.0, 10.0, BinningMethod::Constant { dt: 1.0 }).unwrap();
    let params = [("dt".to_string(), 1.0)].into_iter().collect();
    assert!(matches!(BinningMethod::from_params("blocks", &params), Err(Error::Configuration(_))));
    assert!(matches!(
        BinningMethod::from_params("significance", &params),
        Err(Error::Configuration(_))
    ));
    assert!(ts.create_time_bins(0.0, 10.0, BinningMethod::Constant { dt: -1.0 }).is_err());
    assert_eq!(ts.bins().unwrap().len(), 10);
}

#[test]
fn test_bayesian_blocks_bracket_the_burst() {
    let mut ts = analysis();
    let bins = ts.create_time_bins(-5.0, 20.0, BinningMethod::BayesianBlocks { p0: 0.01 }).unwrap();
    let near = |t: f64| bins.bins().iter().any(|b| (b.interval.start() - t).abs() < 0.2);
    assert!(near(0.0), "{:?}", bins.text_bins());
    assert!(near(5.0), "{:?}", bins.text_bins());
}

#[test]
fn test_background_recovers_rate() {
    let mut ts = analysis();
    let spectrum = ts.active_spectrum().unwrap();
    let expected_per_channel = 400.0 / N_CHANNELS as f64 * spectrum.exposure;
    for c in [0, 1, 6, 7] {
        assert_relative_eq!(spectrum.background[c], expected_per_channel, max_relative = 0.1);
    }
    let excess: f64 = (2..=5).map(|c| spectrum.counts[c] as f64 - spectrum.background[c]).sum();
    assert_relative_eq!(excess, 7500.0, max_relative = 0.1);
}

#[test]
fn test_pha_round_trip() {
    let mut ts = analysis();
    ts.set_active_measurements("20-1000").unwrap();
    ts.create_time_bins(0.0, 5.0, BinningMethod::Constant { dt: 1.0 }).unwrap();
    let spectra = ts.get_ogip_from_binner().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let paths = ts.write_pha_from_binner(&dir.path().join("burst"), false).unwrap();
    assert_eq!(paths.len(), spectra.len());
    for (path, spectrum) in paths.iter().zip(&spectra) {
        let back = read_pha_parquet(path).unwrap();
        assert_eq!(back.counts, spectrum.counts);
        assert_eq!(back.quality, spectrum.quality);
        assert_relative_eq!(back.exposure, spectrum.exposure, max_relative = 1e-12);
    }
    // Refuses to clobber, succeeds with overwrite.
    assert!(ts.write_pha_from_binner(&dir.path().join("burst"), false).is_err());
    assert!(ts.write_pha_from_binner(&dir.path().join("burst"), true).is_ok());
}
