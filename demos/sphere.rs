use std::path::PathBuf;

use xtree_dc::eval::{Expr, TreeEvaluator};
use xtree_dc::{driver, Config, Flags, Region};

fn unit_sphere() -> Expr {
    (Expr::x().square() + Expr::y().square() + Expr::z().square()).sqrt() - Expr::constant(1.0)
}

fn main() {
    let expr = unit_sphere();
    let region = Region::new(-1.1, 1.1, -1.1, 1.1, -1.1, 1.1, 0.2).unwrap();
    let flags = Flags {
        no_jitter: false,
        collapse: true,
    };
    let config = Config::default();

    let mesh = driver::render_mesh(&region, flags, &config, || TreeEvaluator::new(&expr, 16))
        .expect("tessellation failed");

    mesh.export_as_obj(&PathBuf::from("foo.obj"), false)
        .expect("failed to write foo.obj");
}
