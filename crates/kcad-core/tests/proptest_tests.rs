//! 基于属性的测试：坐标转换往返与精度规整幂等

use kcad_core::prelude::*;
use proptest::prelude::*;

fn msk_point() -> impl Strategy<Value = Vertex> {
    (1_250_000.0..1_350_000.0f64, 400_000.0..550_000.0f64).prop_map(|(x, y)| Vertex::new(x, y))
}

fn distance(a: &Vertex, b: &Vertex) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// 围绕中心的星形多边形，顶点按角度递增，保证是简单多边形
fn star_ring() -> impl Strategy<Value = Ring> {
    (
        1_300_000.0..1_300_500.0f64,
        480_000.0..480_500.0f64,
        prop::collection::vec(5.0..50.0f64, 3..16),
    )
        .prop_map(|(cx, cy, radii)| {
            let n = radii.len();
            let mut points: Vec<Point2> = radii
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    let angle = i as f64 / n as f64 * std::f64::consts::TAU;
                    Point2::new(cx + r * angle.cos(), cy + r * angle.sin())
                })
                .collect();
            points.push(points[0]);
            Ring::from_points(points)
        })
}

proptest! {
    #[test]
    fn msk_to_national_roundtrip(v in msk_point()) {
        let engine = TransformEngine::new(ZoneTable::builtin());
        let msk = engine.resolve("МСК-23 зона 1").unwrap();
        let gk = engine.resolve("СК-42 зона 7").unwrap();
        let plan = engine.plan(&msk, &gk).unwrap();
        let back = plan.inverse().unwrap().apply(plan.apply(v).unwrap()).unwrap();
        prop_assert!(distance(&v, &back) < 1e-6);
    }

    #[test]
    fn msk_to_wgs84_roundtrip(v in msk_point()) {
        let engine = TransformEngine::new(ZoneTable::builtin());
        let msk = engine.resolve("МСК-23 зона 1").unwrap();
        let plan = engine.plan(&msk, &CoordinateSystemReference::wgs84()).unwrap();
        let back = plan.inverse().unwrap().apply(plan.apply(v).unwrap()).unwrap();
        prop_assert!(distance(&v, &back) < 1e-6);
    }

    #[test]
    fn roundtrip_preserves_area(ring in star_ring()) {
        let engine = TransformEngine::new(ZoneTable::builtin());
        let msk = engine.resolve("МСК-23 зона 1").unwrap();
        let gk = engine.resolve("СК-42 зона 7").unwrap();
        let plan = engine.plan(&msk, &gk).unwrap();
        let inverse = plan.inverse().unwrap();

        let mut vertices = ring.vertices.clone();
        plan.apply_points(&mut vertices).unwrap();
        inverse.apply_points(&mut vertices).unwrap();
        for (a, b) in ring.vertices.iter().zip(&vertices) {
            prop_assert!(distance(a, b) < 1e-6);
        }
        let back = Ring::new(vertices);
        prop_assert!((back.area() - ring.area()).abs() < 1e-3);
    }

    #[test]
    fn local_frame_roundtrip(
        x in -1_000.0..1_000.0f64,
        y in -1_000.0..1_000.0f64,
        rotation in -180.0..180.0f64,
        scale in 0.5..2.0f64,
    ) {
        let engine = TransformEngine::new(ZoneTable::builtin());
        let base = engine.resolve("МСК-23 зона 1").unwrap();
        let frame = LocalFrame {
            name: "Стройплощадка".to_string(),
            origin_x: 1_300_000.0,
            origin_y: 480_000.0,
            rotation_deg: rotation,
            scale,
        };
        let local = CoordinateSystemReference::local(base.clone(), frame).unwrap();
        let plan = engine.plan(&local, &base).unwrap();
        let v = Vertex::new(x, y);
        let back = plan.inverse().unwrap().apply(plan.apply(v).unwrap()).unwrap();
        prop_assert!(distance(&v, &back) < 1e-6);
    }

    #[test]
    fn normalizer_is_idempotent(ring in star_ring()) {
        let mut parcel = Parcel::new(
            CadastralNumber::parse("23:43:0302001:15").unwrap(),
            ObjectKind::Land,
        );
        parcel.contours.push(Contour::new(ring));

        let normalizer = PrecisionNormalizer::default();
        let first = normalizer.normalize_parcel(&mut parcel);
        prop_assume!(!first.failed());

        let once = parcel.clone();
        let second = normalizer.normalize_parcel(&mut parcel);
        prop_assert!(!second.failed());
        prop_assert_eq!(&parcel, &once);
        prop_assert_eq!(second.stats.adjusted_vertices, 0);
        prop_assert_eq!(second.stats.collapsed_vertices, 0);
    }
}
