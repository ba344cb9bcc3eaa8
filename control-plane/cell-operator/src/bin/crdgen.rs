use cell_operator::crd::Cell;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Cell::crd())?);
    Ok(())
}
