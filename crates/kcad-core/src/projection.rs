//! 椭球、横轴墨卡托投影与七参数基准转换
//!
//! 横轴墨卡托采用 Krüger 级数（六阶，Karney 2011 形式），
//! 在中央子午线两侧数度范围内正反算精度优于 1 微米。
//! 七参数转换采用位置向量约定（与 proj 的 `+towgs84` 一致）。

use crate::error::CoreError;
use crate::math::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// 参考椭球
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    /// 长半轴（米）
    pub a: f64,
    /// 扁率倒数
    pub inv_f: f64,
}

impl Ellipsoid {
    /// 克拉索夫斯基椭球（СК-42/СК-63/МСК）
    pub const KRASOVSKY: Ellipsoid = Ellipsoid {
        a: 6_378_245.0,
        inv_f: 298.3,
    };

    pub const WGS84: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        inv_f: 298.257_223_563,
    };

    /// ГСК-2011
    pub const GSK2011: Ellipsoid = Ellipsoid {
        a: 6_378_136.5,
        inv_f: 298.256_415_1,
    };

    pub const BESSEL: Ellipsoid = Ellipsoid {
        a: 6_377_397.155,
        inv_f: 299.152_812_8,
    };

    pub fn f(&self) -> f64 {
        1.0 / self.inv_f
    }

    /// 第一偏心率平方
    pub fn e2(&self) -> f64 {
        let f = self.f();
        f * (2.0 - f)
    }

    pub fn e(&self) -> f64 {
        self.e2().sqrt()
    }
}

/// 横轴墨卡托参数（角度单位为度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TmParams {
    #[serde(default)]
    pub lat_0: f64,
    pub lon_0: f64,
    #[serde(default = "default_scale")]
    pub k_0: f64,
    pub false_easting: f64,
    #[serde(default)]
    pub false_northing: f64,
    pub ellipsoid: Ellipsoid,
}

fn default_scale() -> f64 {
    1.0
}

/// 横轴墨卡托投影
#[derive(Debug, Clone)]
pub struct TransverseMercator {
    params: TmParams,
    e: f64,
    e2: f64,
    /// 子午线弧长比例 A
    a_hat: f64,
    alpha: [f64; 6],
    beta: [f64; 6],
    /// 纬度原点对应的 ξ
    xi0: f64,
}

impl TransverseMercator {
    pub fn new(params: TmParams) -> Self {
        let f = params.ellipsoid.f();
        let n = f / (2.0 - f);
        let n2 = n * n;
        let n3 = n2 * n;
        let n4 = n3 * n;
        let n5 = n4 * n;
        let n6 = n5 * n;

        let a_hat = params.ellipsoid.a / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0 + n6 / 256.0);

        let alpha = [
            n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0 + 41.0 * n4 / 180.0 - 127.0 * n5 / 288.0
                + 7891.0 * n6 / 37800.0,
            13.0 * n2 / 48.0 - 3.0 * n3 / 5.0 + 557.0 * n4 / 1440.0 + 281.0 * n5 / 630.0
                - 1983433.0 * n6 / 1935360.0,
            61.0 * n3 / 240.0 - 103.0 * n4 / 140.0 + 15061.0 * n5 / 26880.0
                + 167603.0 * n6 / 181440.0,
            49561.0 * n4 / 161280.0 - 179.0 * n5 / 168.0 + 6601661.0 * n6 / 7257600.0,
            34729.0 * n5 / 80640.0 - 3418889.0 * n6 / 1995840.0,
            212378941.0 * n6 / 319334400.0,
        ];
        let beta = [
            n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0 - n4 / 360.0 - 81.0 * n5 / 512.0
                + 96199.0 * n6 / 604800.0,
            n2 / 48.0 + n3 / 15.0 - 437.0 * n4 / 1440.0 + 46.0 * n5 / 105.0
                - 1118711.0 * n6 / 3870720.0,
            17.0 * n3 / 480.0 - 37.0 * n4 / 840.0 - 209.0 * n5 / 4480.0 + 5569.0 * n6 / 90720.0,
            4397.0 * n4 / 161280.0 - 11.0 * n5 / 504.0 - 830251.0 * n6 / 7257600.0,
            4583.0 * n5 / 161280.0 - 108847.0 * n6 / 3991680.0,
            20648693.0 * n6 / 638668800.0,
        ];

        let mut tm = Self {
            params,
            e: params.ellipsoid.e(),
            e2: params.ellipsoid.e2(),
            a_hat,
            alpha,
            beta,
            xi0: 0.0,
        };
        if params.lat_0 != 0.0 {
            let (xi, _) = tm.conformal_xi_eta(params.lat_0.to_radians(), 0.0);
            tm.xi0 = xi;
        }
        tm
    }

    pub fn params(&self) -> &TmParams {
        &self.params
    }

    /// 等角纬度的正切 τ'
    fn tau_prime(&self, tau: f64) -> f64 {
        let sigma = (self.e * (self.e * tau / (1.0 + tau * tau).sqrt()).atanh()).sinh();
        tau * (1.0 + sigma * sigma).sqrt() - sigma * (1.0 + tau * tau).sqrt()
    }

    fn conformal_xi_eta(&self, phi: f64, lambda: f64) -> (f64, f64) {
        let tau_p = self.tau_prime(phi.tan());
        let xi_p = tau_p.atan2(lambda.cos());
        let eta_p = (lambda.sin() / (tau_p * tau_p + lambda.cos().powi(2)).sqrt()).asinh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, a) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j as f64 + 1.0);
            xi += a * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += a * (k * xi_p).cos() * (k * eta_p).sinh();
        }
        (xi, eta)
    }

    /// 大地坐标（经度、纬度，度）→ 平面坐标（东、北，米）
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let mut lambda = (lon - self.params.lon_0).to_radians();
        lambda = (lambda + std::f64::consts::PI).rem_euclid(std::f64::consts::TAU)
            - std::f64::consts::PI;
        let (xi, eta) = self.conformal_xi_eta(lat.to_radians(), lambda);
        let k = self.params.k_0 * self.a_hat;
        (
            self.params.false_easting + k * eta,
            self.params.false_northing + k * (xi - self.xi0),
        )
    }

    /// 平面坐标（东、北，米）→ 大地坐标（经度、纬度，度）
    pub fn inverse(&self, east: f64, north: f64) -> (f64, f64) {
        let k = self.params.k_0 * self.a_hat;
        let xi = (north - self.params.false_northing) / k + self.xi0;
        let eta = (east - self.params.false_easting) / k;

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, b) in self.beta.iter().enumerate() {
            let m = 2.0 * (j as f64 + 1.0);
            xi_p -= b * (m * xi).sin() * (m * eta).cosh();
            eta_p -= b * (m * xi).cos() * (m * eta).sinh();
        }

        let tau_p = xi_p.sin() / (eta_p.sinh().powi(2) + xi_p.cos().powi(2)).sqrt();
        let lambda = eta_p.sinh().atan2(xi_p.cos());

        // 牛顿迭代由 τ' 求 τ
        let mut tau = tau_p;
        for _ in 0..10 {
            let tau_i_p = self.tau_prime(tau);
            let delta = (tau_p - tau_i_p) / (1.0 + tau_i_p * tau_i_p).sqrt()
                * (1.0 + (1.0 - self.e2) * tau * tau)
                / ((1.0 - self.e2) * (1.0 + tau * tau).sqrt());
            tau += delta;
            if delta.abs() < 1e-14 {
                break;
            }
        }

        (
            self.params.lon_0 + lambda.to_degrees(),
            tau.atan().to_degrees(),
        )
    }
}

/// 大地坐标 → 地心直角坐标
pub fn geodetic_to_geocentric(ellipsoid: &Ellipsoid, lon: f64, lat: f64, h: f64) -> Vector3 {
    let (phi, lambda) = (lat.to_radians(), lon.to_radians());
    let e2 = ellipsoid.e2();
    let n = ellipsoid.a / (1.0 - e2 * phi.sin().powi(2)).sqrt();
    Vector3::new(
        (n + h) * phi.cos() * lambda.cos(),
        (n + h) * phi.cos() * lambda.sin(),
        (n * (1.0 - e2) + h) * phi.sin(),
    )
}

/// 地心直角坐标 → 大地坐标（经度、纬度为度，高程为米）
pub fn geocentric_to_geodetic(ellipsoid: &Ellipsoid, v: &Vector3) -> (f64, f64, f64) {
    let e2 = ellipsoid.e2();
    let p = (v.x * v.x + v.y * v.y).sqrt();
    let lambda = v.y.atan2(v.x);
    let mut phi = v.z.atan2(p * (1.0 - e2));
    let mut h = 0.0;
    for _ in 0..20 {
        let n = ellipsoid.a / (1.0 - e2 * phi.sin().powi(2)).sqrt();
        h = p / phi.cos() - n;
        let next = v.z.atan2(p * (1.0 - e2 * n / (n + h)));
        let done = (next - phi).abs() < 1e-15;
        phi = next;
        if done {
            break;
        }
    }
    (lambda.to_degrees(), phi.to_degrees(), h)
}

/// 七参数（到 WGS-84），旋转单位角秒，尺度单位 ppm
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DatumShift {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    #[serde(default)]
    pub rx: f64,
    #[serde(default)]
    pub ry: f64,
    #[serde(default)]
    pub rz: f64,
    #[serde(default)]
    pub ds: f64,
}

impl DatumShift {
    /// СК-42 → WGS-84
    pub const SK42: DatumShift = DatumShift {
        dx: 23.57,
        dy: -140.95,
        dz: -79.8,
        rx: 0.0,
        ry: 0.35,
        rz: 0.79,
        ds: -0.22,
    };

    /// СК-95 → WGS-84
    pub const SK95: DatumShift = DatumShift {
        dx: 24.47,
        dy: -130.89,
        dz: -81.56,
        rx: 0.0,
        ry: 0.0,
        rz: 0.13,
        ds: -0.22,
    };

    /// ГСК-2011 → WGS-84
    pub const GSK2011: DatumShift = DatumShift {
        dx: 0.013,
        dy: -0.092,
        dz: -0.03,
        rx: -0.001738,
        ry: 0.003559,
        rz: -0.004263,
        ds: 0.0074,
    };

    /// 由 "dx,dy,dz,rx,ry,rz,ds" 文本解析（proj 的 towgs84 写法）
    pub fn parse(text: &str) -> Option<Self> {
        let values: Vec<f64> = text
            .split(',')
            .map(|t| t.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        match values.as_slice() {
            [dx, dy, dz] => Some(Self {
                dx: *dx,
                dy: *dy,
                dz: *dz,
                ..Default::default()
            }),
            [dx, dy, dz, rx, ry, rz, ds] => Some(Self {
                dx: *dx,
                dy: *dy,
                dz: *dz,
                rx: *rx,
                ry: *ry,
                rz: *rz,
                ds: *ds,
            }),
            _ => None,
        }
    }
}

/// 基于地心坐标的七参数转换
#[derive(Debug, Clone)]
pub struct Helmert7 {
    translation: Vector3,
    matrix: Matrix3,
    inverse: Matrix3,
}

impl Helmert7 {
    pub fn new(shift: &DatumShift) -> Result<Self, CoreError> {
        let arcsec = std::f64::consts::PI / (180.0 * 3600.0);
        let (rx, ry, rz) = (shift.rx * arcsec, shift.ry * arcsec, shift.rz * arcsec);
        let scale = 1.0 + shift.ds * 1e-6;
        let matrix = Matrix3::new(
            1.0, -rz,  ry,
             rz, 1.0, -rx,
            -ry,  rx, 1.0,
        ) * scale;
        let inverse = matrix
            .try_inverse()
            .ok_or_else(|| CoreError::Transform("singular datum rotation matrix".to_string()))?;
        Ok(Self {
            translation: Vector3::new(shift.dx, shift.dy, shift.dz),
            matrix,
            inverse,
        })
    }

    pub fn forward(&self, v: &Vector3) -> Vector3 {
        self.translation + self.matrix * v
    }

    pub fn inverse(&self, v: &Vector3) -> Vector3 {
        self.inverse * (v - self.translation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msk23_zone1() -> TransverseMercator {
        TransverseMercator::new(TmParams {
            lat_0: 0.0,
            lon_0: 37.983_333_333_33,
            k_0: 1.0,
            false_easting: 1_300_000.0,
            false_northing: -4_511_057.63,
            ellipsoid: Ellipsoid::KRASOVSKY,
        })
    }

    #[test]
    fn test_central_meridian_maps_to_false_easting() {
        let tm = msk23_zone1();
        let (e, _) = tm.forward(37.983_333_333_33, 45.0);
        assert!((e - 1_300_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_equator_on_central_meridian() {
        let tm = TransverseMercator::new(TmParams {
            lat_0: 0.0,
            lon_0: 39.0,
            k_0: 1.0,
            false_easting: 7_500_000.0,
            false_northing: 0.0,
            ellipsoid: Ellipsoid::KRASOVSKY,
        });
        let (e, n) = tm.forward(39.0, 0.0);
        assert!((e - 7_500_000.0).abs() < 1e-6);
        assert!(n.abs() < 1e-6);
    }

    #[test]
    fn test_meridian_arc_length() {
        // WGS-84 椭球赤道到 45° 的子午线弧长 4 984 944.378 米
        let tm = TransverseMercator::new(TmParams {
            lat_0: 0.0,
            lon_0: 39.0,
            k_0: 1.0,
            false_easting: 0.0,
            false_northing: 0.0,
            ellipsoid: Ellipsoid::WGS84,
        });
        let (_, n) = tm.forward(39.0, 45.0);
        assert!((n - 4_984_944.4).abs() < 1.0, "arc = {}", n);
    }

    #[test]
    fn test_forward_inverse_roundtrip() {
        let tm = msk23_zone1();
        for &(lon, lat) in &[(38.0, 45.0), (39.5, 44.2), (36.7, 46.1), (37.98, 43.5)] {
            let (e, n) = tm.forward(lon, lat);
            let (lon2, lat2) = tm.inverse(e, n);
            let (e2, n2) = tm.forward(lon2, lat2);
            assert!((e - e2).abs() < 1e-6 && (n - n2).abs() < 1e-6);
            assert!((lon - lon2).abs() < 1e-10 && (lat - lat2).abs() < 1e-10);
        }
    }

    #[test]
    fn test_nonzero_latitude_of_origin() {
        let tm = TransverseMercator::new(TmParams {
            lat_0: 55.666_666_666_67,
            lon_0: 37.5,
            k_0: 1.0,
            false_easting: 16.098,
            false_northing: 14.512,
            ellipsoid: Ellipsoid::BESSEL,
        });
        let (e, n) = tm.forward(37.5, 55.666_666_666_67);
        assert!((e - 16.098).abs() < 1e-6);
        assert!((n - 14.512).abs() < 1e-6);
    }

    #[test]
    fn test_geocentric_roundtrip() {
        let ell = Ellipsoid::KRASOVSKY;
        let v = geodetic_to_geocentric(&ell, 38.5, 45.25, 120.0);
        let (lon, lat, h) = geocentric_to_geodetic(&ell, &v);
        assert!((lon - 38.5).abs() < 1e-11);
        assert!((lat - 45.25).abs() < 1e-11);
        assert!((h - 120.0).abs() < 1e-6);
    }

    #[test]
    fn test_helmert_inverse_is_exact() {
        let helmert = Helmert7::new(&DatumShift::SK42).unwrap();
        let v = geodetic_to_geocentric(&Ellipsoid::KRASOVSKY, 38.5, 45.25, 0.0);
        let back = helmert.inverse(&helmert.forward(&v));
        assert!((back - v).norm() < 1e-6);
    }

    #[test]
    fn test_parse_towgs84() {
        let shift = DatumShift::parse("23.57,-140.95,-79.8,0,0.35,0.79,-0.22").unwrap();
        assert_eq!(shift, DatumShift::SK42);
        assert!(DatumShift::parse("1,2").is_none());
    }
}
