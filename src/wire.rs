use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::auth::AuthSource;
use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::model::*;
use crate::observability::{self, request_label};
use crate::protocol::*;

/// Per-connection state. Empty until a successful `hello`.
#[derive(Debug, Default)]
pub struct Session {
    actor: Option<Actor>,
}

impl Session {
    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }
}

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::other(other),
    }
}

async fn send(framed: &mut Framed<TcpStream, LinesCodec>, response: &Response) -> io::Result<()> {
    let line = serde_json::to_string(response).map_err(io::Error::other)?;
    framed.send(line).await.map_err(codec_err)
}

/// Serve one client until it hangs up.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    auth: Arc<dyn AuthSource>,
) -> io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let mut session = Session::default();

    while let Some(frame) = framed.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                send(&mut framed, &Response::err(ProtocolError::LineTooLong)).await?;
                break;
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&engine, auth.as_ref(), &mut session, &line).await;
        send(&mut framed, &response).await?;
    }

    if let Some(actor) = session.actor() {
        debug!("session closed for {actor}");
    }
    Ok(())
}

/// Parse, authorize and execute one request line.
pub async fn handle_line(
    engine: &Engine,
    auth: &dyn AuthSource,
    session: &mut Session,
    line: &str,
) -> Response {
    let start = Instant::now();
    let (op, response) = match parse_request(line) {
        Ok(req) => {
            let op = request_label(&req);
            (op, Response::from(dispatch(engine, auth, session, req).await))
        }
        Err(e) => ("invalid", Response::err(e)),
    };

    let status = if response.ok { "ok" } else { "error" };
    metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());
    response
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ErrorBody> {
    serde_json::to_value(value).map_err(|e| ErrorBody {
        code: "Internal".into(),
        message: e.to_string(),
    })
}

async fn dispatch(
    engine: &Engine,
    auth: &dyn AuthSource,
    session: &mut Session,
    req: Request,
) -> Result<Value, ErrorBody> {
    match req {
        // One identity per connection.
        Request::Hello { .. } if session.actor.is_some() => Err(ProtocolError::AlreadyGreeted.into()),
        Request::Hello { role, id, password } => hello(auth, session, role, id, password).await,
        other => {
            let actor = session.actor.clone().ok_or(ProtocolError::HelloRequired)?;
            serve(engine, &actor, other).await
        }
    }
}

async fn hello(
    auth: &dyn AuthSource,
    session: &mut Session,
    role: Role,
    id: String,
    password: Option<String>,
) -> Result<Value, ErrorBody> {
    let id = id.trim().to_string();
    if id.is_empty() {
        return Err(ProtocolError::AuthFailed.into());
    }
    let actor = match role {
        Role::Guest => Actor::Guest(id),
        Role::Operator => {
            let password = password.unwrap_or_default();
            if !auth.verify_operator(&id, &password).await {
                metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                warn!("operator login refused for {id}");
                return Err(ProtocolError::AuthFailed.into());
            }
            Actor::Operator(id)
        }
    };
    info!("session opened for {actor}");
    let reply = json!({ "role": role, "id": actor.id() });
    session.actor = Some(actor);
    Ok(reply)
}

fn operator_only(actor: &Actor) -> Result<(), ProtocolError> {
    if actor.is_operator() {
        Ok(())
    } else {
        Err(ProtocolError::OperatorOnly)
    }
}

fn guest_id(actor: &Actor) -> Result<&str, ProtocolError> {
    match actor {
        Actor::Guest(id) => Ok(id),
        _ => Err(ProtocolError::GuestOnly),
    }
}

fn views(bookings: Vec<Booking>, now: Ms) -> Vec<BookingView> {
    bookings.into_iter().map(|b| BookingView::new(b, now)).collect()
}

async fn serve(engine: &Engine, actor: &Actor, req: Request) -> Result<Value, ErrorBody> {
    match req {
        Request::Hello { .. } => Err(ProtocolError::AlreadyGreeted.into()),
        Request::Periods => {
            let catalog = engine.catalog().await;
            let periods: Vec<PeriodView> = catalog
                .iter()
                .map(|(id, period)| PeriodView {
                    id,
                    period: period.clone(),
                    latest_check_in: catalog.latest_check_in(id),
                    bookable: period.fits_min_stay(),
                })
                .collect();
            to_json(&periods)
        }
        Request::Calendar { from, to } => {
            let days = engine.calendar(&DateRange::new(from, to)).await?;
            to_json(&days)
        }
        Request::AvailableDates { from, to } => {
            let dates = engine.available_dates(&DateRange::new(from, to)).await?;
            to_json(&dates)
        }
        Request::Validate { period, check_in, check_out } => {
            let (period_id, proposal) = engine
                .quote(period, &DateRange::new(check_in, check_out))
                .await?;
            to_json(&QuoteView { period_id, proposal })
        }
        Request::Book { period, check_in, check_out, guest } => {
            let guest_id = guest_id(actor)?;
            let booking = match period {
                Some(period) => {
                    engine
                        .book(period, DateRange::new(check_in, check_out), guest_id, &guest)
                        .await?
                }
                None => {
                    let (_, proposal) = engine
                        .quote(None, &DateRange::new(check_in, check_out))
                        .await?;
                    engine.create_from_proposal(proposal, guest_id, &guest).await?
                }
            };
            to_json(&BookingView::new(booking, engine.now()))
        }
        Request::MyBookings => {
            let guest_id = guest_id(actor)?;
            let bookings = engine.list_for_guest(guest_id).await;
            to_json(&views(bookings, engine.now()))
        }
        Request::Get { id } => {
            let booking = engine.get(id).await?;
            // Guests never learn about other guests' bookings.
            if matches!(actor, Actor::Guest(guest_id) if booking.guest_id != *guest_id) {
                return Err(EngineError::NotFound(id).into());
            }
            to_json(&BookingView::new(booking, engine.now()))
        }
        Request::Confirm { id } => {
            let booking = engine.confirm(id, actor).await?;
            to_json(&BookingView::new(booking, engine.now()))
        }
        Request::Cancel { id } => {
            let booking = engine.cancel(id, actor).await?;
            to_json(&BookingView::new(booking, engine.now()))
        }
        Request::CreateManual { booking } => {
            let booking = engine.create_manual(&booking, actor).await?;
            to_json(&BookingView::new(booking, engine.now()))
        }
        Request::List { filter } => {
            operator_only(actor)?;
            let bookings = engine.list(&filter).await;
            to_json(&views(bookings, engine.now()))
        }
        Request::Activity { limit } => {
            operator_only(actor)?;
            let limit = limit
                .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
                .min(MAX_ACTIVITY_ENTRIES);
            to_json(&engine.activity(limit).await)
        }
        Request::Summary => {
            operator_only(actor)?;
            to_json(&engine.status_counts().await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OperatorAuth;
    use crate::engine::PeriodCatalog;
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staybook_test_wire");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn engine(name: &str) -> Engine {
        let catalog = PeriodCatalog::new(vec![AvailabilityPeriod {
            resort: "Dolphin Cove".into(),
            unit_type: "2BR".into(),
            start_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
            min_stay_nights: 3,
            base_cost: 30_000,
            base_nights: 3,
            booking_code: "DC-7".into(),
        }]);
        Engine::new(test_wal_path(name), catalog, Arc::new(NotifyHub::new())).unwrap()
    }

    const BOOK: &str = r#"{"op":"book","period":0,"check_in":"2025-06-03","check_out":"2025-06-07",
        "guest":{"email":"ana@x.io","first_name":"Ana","last_name":"Lee","party_size":2}}"#;

    async fn line(engine: &Engine, session: &mut Session, text: &str) -> Response {
        let auth = OperatorAuth::new("pw".into());
        handle_line(engine, &auth, session, text).await
    }

    #[tokio::test]
    async fn hello_required_first() {
        let engine = engine("hello_first.wal");
        let mut session = Session::default();
        let r = line(&engine, &mut session, r#"{"op":"periods"}"#).await;
        assert_eq!(r.error_code(), Some("HelloRequired"));
        assert!(session.actor().is_none());
    }

    #[tokio::test]
    async fn operator_password_checked() {
        let engine = engine("operator_pw.wal");
        let mut session = Session::default();
        let r = line(&engine, &mut session, r#"{"op":"hello","role":"operator","id":"ops","password":"wrong"}"#).await;
        assert_eq!(r.error_code(), Some("AuthFailed"));
        assert!(session.actor().is_none());

        let r = line(&engine, &mut session, r#"{"op":"hello","role":"operator","id":"ops","password":"pw"}"#).await;
        assert!(r.ok);
        assert_eq!(session.actor(), Some(&Actor::Operator("ops".into())));
    }

    #[tokio::test]
    async fn guest_books_and_sees_own() {
        let engine = engine("guest_books.wal");
        let mut ana = Session::default();
        line(&engine, &mut ana, r#"{"op":"hello","role":"guest","id":"ana@x.io"}"#).await;

        let r = line(&engine, &mut ana, BOOK).await;
        assert!(r.ok, "{r:?}");
        let data = r.data.unwrap();
        assert_eq!(data["cost"], 40_000);
        assert_eq!(data["status"], "pending");
        assert_eq!(data["hours_left"], 24);
        let id = data["id"].as_str().unwrap().to_string();

        let r = line(&engine, &mut ana, r#"{"op":"my_bookings"}"#).await;
        assert_eq!(r.data.unwrap().as_array().unwrap().len(), 1);

        let mut bob = Session::default();
        line(&engine, &mut bob, r#"{"op":"hello","role":"guest","id":"bob@x.io"}"#).await;
        let get = format!(r#"{{"op":"get","id":"{id}"}}"#);
        let r = line(&engine, &mut bob, &get).await;
        assert_eq!(r.error_code(), Some("NotFound"));
        assert!(line(&engine, &mut ana, &get).await.ok);
    }

    #[tokio::test]
    async fn guest_cannot_use_operator_ops() {
        let engine = engine("guest_ops.wal");
        let mut session = Session::default();
        line(&engine, &mut session, r#"{"op":"hello","role":"guest","id":"ana@x.io"}"#).await;
        let id = line(&engine, &mut session, BOOK).await.data.unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();

        let r = line(&engine, &mut session, &format!(r#"{{"op":"confirm","id":"{id}"}}"#)).await;
        assert_eq!(r.error_code(), Some("Forbidden"));
        for op in [r#"{"op":"list"}"#, r#"{"op":"summary"}"#, r#"{"op":"activity"}"#] {
            let r = line(&engine, &mut session, op).await;
            assert_eq!(r.error_code(), Some("OperatorOnly"), "{op}");
        }
    }

    #[tokio::test]
    async fn operator_cannot_book_as_guest() {
        let engine = engine("operator_book.wal");
        let mut session = Session::default();
        line(&engine, &mut session, r#"{"op":"hello","role":"operator","id":"ops","password":"pw"}"#).await;
        let r = line(&engine, &mut session, BOOK).await;
        assert_eq!(r.error_code(), Some("GuestOnly"));
        assert_eq!(engine.booking_count(), 0);
    }

    #[tokio::test]
    async fn validation_errors_carry_codes() {
        let engine = engine("validate_codes.wal");
        let mut session = Session::default();
        line(&engine, &mut session, r#"{"op":"hello","role":"guest","id":"ana@x.io"}"#).await;

        let r = line(
            &engine,
            &mut session,
            r#"{"op":"validate","period":0,"check_in":"2025-06-03","check_out":"2025-06-04"}"#,
        )
        .await;
        assert_eq!(r.error_code(), Some("BelowMinimumStay"));

        let r = line(
            &engine,
            &mut session,
            r#"{"op":"validate","period":9,"check_in":"2025-06-03","check_out":"2025-06-07"}"#,
        )
        .await;
        assert_eq!(r.error_code(), Some("UnknownPeriod"));

        let r = line(&engine, &mut session, "{not json").await;
        assert_eq!(r.error_code(), Some("BadRequest"));
    }

    #[tokio::test]
    async fn operator_confirms_and_summarizes() {
        let engine = engine("operator_flow.wal");
        let mut guest = Session::default();
        line(&engine, &mut guest, r#"{"op":"hello","role":"guest","id":"ana@x.io"}"#).await;
        let id = line(&engine, &mut guest, BOOK).await.data.unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();

        let mut ops = Session::default();
        line(&engine, &mut ops, r#"{"op":"hello","role":"operator","id":"ops","password":"pw"}"#).await;
        let confirm = format!(r#"{{"op":"confirm","id":"{id}"}}"#);
        let r = line(&engine, &mut ops, &confirm).await;
        assert_eq!(r.data.unwrap()["status"], "confirmed");
        let r = line(&engine, &mut ops, &confirm).await;
        assert_eq!(r.error_code(), Some("InvalidTransition"));

        let r = line(&engine, &mut ops, r#"{"op":"summary"}"#).await;
        let counts = r.data.unwrap();
        assert_eq!(counts["total"], 1);
        assert_eq!(counts["confirmed"], 1);

        let r = line(&engine, &mut ops, r#"{"op":"activity","limit":1}"#).await;
        let log = r.data.unwrap();
        assert_eq!(log.as_array().unwrap().len(), 1);
        assert_eq!(log[0]["action"]["kind"], "confirmed");
    }

    #[tokio::test]
    async fn second_hello_is_refused() {
        let engine = engine("second_hello.wal");
        let mut session = Session::default();
        let r = line(&engine, &mut session, r#"{"op":"hello","role":"guest","id":"ana@x.io"}"#).await;
        assert!(r.ok);

        let r = line(&engine, &mut session, r#"{"op":"hello","role":"guest","id":"bob@x.io"}"#).await;
        assert_eq!(r.error_code(), Some("AlreadyGreeted"));
        let r = line(&engine, &mut session, r#"{"op":"hello","role":"operator","id":"ops","password":"pw"}"#).await;
        assert_eq!(r.error_code(), Some("AlreadyGreeted"));
        assert_eq!(session.actor(), Some(&Actor::Guest("ana@x.io".into())));
    }

    #[tokio::test]
    async fn party_size_must_be_a_whole_number() {
        let engine = engine("party_size_text.wal");
        let mut session = Session::default();
        line(&engine, &mut session, r#"{"op":"hello","role":"guest","id":"ana@x.io"}"#).await;

        for size in [r#""four""#, "2.5"] {
            let req = BOOK.replace(r#""party_size":2"#, &format!(r#""party_size":{size}"#));
            let r = line(&engine, &mut session, &req).await;
            assert_eq!(r.error_code(), Some("MissingGuestField"), "{size}");
        }
        assert_eq!(engine.booking_count(), 0);

        let req = BOOK.replace(r#""party_size":2"#, r#""party_size":"4""#);
        let r = line(&engine, &mut session, &req).await;
        assert!(r.ok, "{r:?}");
        assert_eq!(r.data.unwrap()["guest"]["party_size"], 4);
    }

    #[tokio::test]
    async fn dates_first_booking_finds_its_period() {
        let engine = engine("dates_first.wal");
        let mut session = Session::default();
        line(&engine, &mut session, r#"{"op":"hello","role":"guest","id":"ana@x.io"}"#).await;

        let r = line(
            &engine,
            &mut session,
            r#"{"op":"available_dates","from":"2025-06-09","to":"2025-06-12"}"#,
        )
        .await;
        assert_eq!(r.data.unwrap(), json!(["2025-06-09", "2025-06-10"]));

        let r = line(
            &engine,
            &mut session,
            r#"{"op":"validate","check_in":"2025-06-03","check_out":"2025-06-07"}"#,
        )
        .await;
        let quote = r.data.unwrap();
        assert_eq!(quote["period_id"], 0);
        assert_eq!(quote["cost"], 40_000);

        let r = line(
            &engine,
            &mut session,
            r#"{"op":"validate","check_in":"2025-06-20","check_out":"2025-06-24"}"#,
        )
        .await;
        assert_eq!(r.error_code(), Some("NotAvailable"));

        let req = BOOK.replace(r#""period":0,"#, "");
        let r = line(&engine, &mut session, &req).await;
        assert!(r.ok, "{r:?}");
        assert_eq!(engine.booking_count(), 1);
    }
}
