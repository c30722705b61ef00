//! Wire shapes for the JSON API. Field names are camelCase; times are `HH:MM`.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::model::{ReservationInfo, ReservationStatus, StationId, StationReservations};

/// `HH:MM` on the way out; `HH:MM` or `HH:MM:SS[.fff]` on the way in.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&t.format("%H:%M"))
    }

    pub fn parse(raw: &str) -> Option<NaiveTime> {
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S%.f"))
            .ok()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid time {raw:?}, expected HH:MM")))
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(raw) => parse(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid time {raw:?}, expected HH:MM"))),
                None => Ok(None),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationReq {
    pub station_id: StationId,
    pub plate: String,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    #[serde(default)]
    pub contact_email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPlateReq {
    pub plate: String,
    /// Accepted for symmetry with the create body; the plate axis spans all stations.
    #[serde(default)]
    pub station_id: Option<StationId>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "hhmm::option::deserialize")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, deserialize_with = "hhmm::option::deserialize")]
    pub end_time: Option<NaiveTime>,
}

impl VerifyPlateReq {
    /// The interval to check, only when all three parts are present.
    pub fn interval(&self) -> Option<(NaiveDate, NaiveTime, NaiveTime)> {
        Some((self.date?, self.start_time?, self.end_time?))
    }
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Default, Deserialize)]
pub struct OwnerQuery {
    pub email: Option<String>,
    pub plate: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationDto {
    pub id: String,
    pub station_id: StationId,
    pub plate: String,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub status: ReservationStatus,
    pub contact_email: Option<String>,
}

impl From<ReservationInfo> for ReservationDto {
    fn from(r: ReservationInfo) -> Self {
        Self {
            id: r.id.to_string(),
            station_id: r.station_id,
            plate: r.plate,
            date: r.span.start.date(),
            start_time: r.span.start.time(),
            end_time: r.span.end.time(),
            status: r.status,
            contact_email: r.contact_email,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationReservationsDto {
    pub station_id: StationId,
    pub name: String,
    pub reservations: Vec<ReservationDto>,
}

impl From<StationReservations> for StationReservationsDto {
    fn from(sr: StationReservations) -> Self {
        Self {
            station_id: sr.station.id,
            name: sr.station.name,
            reservations: sr.reservations.into_iter().map(ReservationDto::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationsResponse {
    pub stations: Vec<StationReservationsDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPlateResp {
    pub valid: bool,
    pub conflict: bool,
    pub message: String,
    pub conflicting_reservation: Option<ReservationDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_body_accepts_short_and_long_times() {
        let req: CreateReservationReq = serde_json::from_str(
            r#"{"stationId":1,"plate":"12AB3456","date":"2030-01-02","startTime":"09:00","endTime":"10:30:00"}"#,
        )
        .unwrap();
        assert_eq!(req.start_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(req.end_time, NaiveTime::from_hms_opt(10, 30, 0).unwrap());
        assert_eq!(req.contact_email, None);
    }

    #[test]
    fn bad_time_rejected() {
        let res: Result<CreateReservationReq, _> = serde_json::from_str(
            r#"{"stationId":1,"plate":"12AB3456","date":"2030-01-02","startTime":"9am","endTime":"10:00"}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn verify_interval_needs_all_parts() {
        let partial: VerifyPlateReq =
            serde_json::from_str(r#"{"plate":"12AB3456","date":"2030-01-02","startTime":"09:00"}"#).unwrap();
        assert!(partial.interval().is_none());

        let full: VerifyPlateReq = serde_json::from_str(
            r#"{"plate":"12AB3456","date":"2030-01-02","startTime":"09:00","endTime":"09:30"}"#,
        )
        .unwrap();
        assert!(full.interval().is_some());
    }

    #[test]
    fn reservation_dto_shape() {
        let dto = ReservationDto {
            id: "01J0000000000000000000000".into(),
            station_id: 2,
            plate: "12AB 3456".into(),
            date: NaiveDate::from_ymd_opt(2030, 1, 2).unwrap(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            status: ReservationStatus::InProgress,
            contact_email: None,
        };
        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["stationId"], 2);
        assert_eq!(json["date"], "2030-01-02");
        assert_eq!(json["startTime"], "09:00");
        assert_eq!(json["endTime"], "09:30");
        assert_eq!(json["status"], "IN_PROGRESS");
        assert!(json["contactEmail"].is_null());
    }
}
