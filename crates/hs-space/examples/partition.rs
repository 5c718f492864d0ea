use hs_space::{LatinHypercube, SpacePartitioner};
use hs_types::{Dimension, HsResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

fn main() -> HsResult<()> {
    println!("Hyperspace partition example");

    let dimensions = vec![
        Dimension::from_spec("n_estimators", &json!([10, 200]))?,
        Dimension::from_spec("learning_rate", &json!([1e-4, 1e-1, "log-uniform"]))?,
        Dimension::from_spec("criterion", &json!(["gini", "entropy", "log_loss"]))?,
    ];

    let partitioner = SpacePartitioner::new(0.25)?;
    let hyperspaces = partitioner.divide(&dimensions)?;
    println!("{} dimensions -> {} hyperspaces", dimensions.len(), hyperspaces.len());

    for space in &hyperspaces {
        println!("  {space}");
    }

    let bounds = partitioner.bounds_only(&dimensions)?;
    let lhs = LatinHypercube::new(4)?;
    let mut rng = StdRng::seed_from_u64(0);
    let start = lhs.sample(&bounds[0], &mut rng)?;
    println!("Latin hypercube start for hyperspace 0:");
    for point in start {
        let rendered: Vec<String> = point.iter().map(|v| v.to_string()).collect();
        println!("  [{}]", rendered.join(", "));
    }

    Ok(())
}
