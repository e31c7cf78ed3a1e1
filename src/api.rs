// src/api.rs
use crate::auth::{Accounts, SessionKeys, SessionUser, SESSION_COOKIE};
use crate::db::Database;
use crate::error::AppError;
use crate::models::{usd, Holding, LoginForm, QuoteForm, RegisterForm, TradeForm, UserId};
use crate::portfolio;
use crate::quote::PriceLookup;
use crate::trade::{self, Side};
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::header::{HeaderMap, HeaderValue, CACHE_CONTROL, EXPIRES, PRAGMA};
use warp::http::{StatusCode, Uri};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const MAX_FORM_BYTES: u64 = 16 * 1024;

/// Everything a handler needs, owned and cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub prices: Arc<dyn PriceLookup>,
    pub accounts: Accounts,
}

impl AppState {
    pub fn new(db: Database, prices: Arc<dyn PriceLookup>, accounts: Accounts) -> Self {
        AppState {
            db,
            prices,
            accounts,
        }
    }
}

#[derive(Serialize)]
struct FormView {
    form: &'static str,
    fields: &'static [&'static str],
    #[serde(skip_serializing_if = "Option::is_none")]
    holdings: Option<Vec<Holding>>,
}

#[derive(Debug, Serialize)]
pub struct PortfolioRow {
    pub symbol: String,
    pub name: String,
    pub shares: Decimal,
    pub price: Option<String>,
    pub value: Option<String>,
}

/// `total` is absent when any holding could not be priced.
#[derive(Debug, Serialize)]
pub struct PortfolioView {
    pub cash: String,
    pub holdings: Vec<PortfolioRow>,
    pub total: Option<String>,
}

#[derive(Serialize)]
struct HistoryRow {
    date: String,
    symbol: String,
    name: String,
    shares: Decimal,
    price: String,
    value: String,
}

#[derive(Serialize)]
struct QuoteView {
    name: String,
    symbol: String,
    price: String,
}

#[derive(Serialize)]
struct Apology<'a> {
    error: &'a str,
    code: u16,
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let sessions = state.accounts.sessions().clone();

    let index = warp::path::end()
        .and(warp::get())
        .and(with_user(sessions.clone()))
        .and(with_state(state.clone()))
        .and_then(index_handler);

    let buy_form = warp::path!("buy")
        .and(warp::get())
        .and(with_user(sessions.clone()))
        .map(|_user: SessionUser| form_view("buy", &["symbol", "shares"]));

    let buy = warp::path!("buy")
        .and(warp::post())
        .and(with_user(sessions.clone()))
        .and(with_state(state.clone()))
        .and(form_body::<TradeForm>())
        .and_then(buy_handler);

    let sell_form = warp::path!("sell")
        .and(warp::get())
        .and(with_user(sessions.clone()))
        .and(with_state(state.clone()))
        .and_then(sell_form_handler);

    let sell = warp::path!("sell")
        .and(warp::post())
        .and(with_user(sessions.clone()))
        .and(with_state(state.clone()))
        .and(form_body::<TradeForm>())
        .and_then(sell_handler);

    let quote_form = warp::path!("quote")
        .and(warp::get())
        .and(with_user(sessions.clone()))
        .map(|_user: SessionUser| form_view("quote", &["symbol"]));

    let quote = warp::path!("quote")
        .and(warp::post())
        .and(with_user(sessions.clone()))
        .and(with_state(state.clone()))
        .and(form_body::<QuoteForm>())
        .and_then(quote_handler);

    let history = warp::path!("history")
        .and(warp::get())
        .and(with_user(sessions.clone()))
        .and(with_state(state.clone()))
        .and_then(history_handler);

    let login_form = warp::path!("login")
        .and(warp::get())
        .map(|| clearing_session(form_view("login", &["username", "password"])));

    let login = warp::path!("login")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(form_body::<LoginForm>())
        .and_then(login_handler);

    let logout = warp::path!("logout")
        .and(warp::get())
        .map(|| clearing_session(see_other("/")));

    let register_form = warp::path!("register").and(warp::get()).map(|| {
        clearing_session(form_view(
            "register",
            &["username", "password", "confirmation"],
        ))
    });

    let register = warp::path!("register")
        .and(warp::post())
        .and(with_state(state))
        .and(form_body::<RegisterForm>())
        .and_then(register_handler);

    index
        .or(buy_form)
        .or(buy)
        .or(sell_form)
        .or(sell)
        .or(quote_form)
        .or(quote)
        .or(history)
        .or(login_form)
        .or(login)
        .or(logout)
        .or(register_form)
        .or(register)
        .recover(handle_rejection)
        .with(warp::reply::with::headers(no_cache_headers()))
        .with(warp::log("stock_trader::api"))
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Resolves the session cookie to a user, rejecting with `Unauthorized`.
fn with_user(
    sessions: SessionKeys,
) -> impl Filter<Extract = (SessionUser,), Error = Rejection> + Clone {
    warp::cookie::optional::<String>(SESSION_COOKIE).and_then(move |token: Option<String>| {
        let sessions = sessions.clone();
        async move {
            token
                .ok_or(AppError::Unauthorized)
                .and_then(|token| sessions.verify(&token))
                .map_err(warp::reject::custom)
        }
    })
}

fn form_body<T: DeserializeOwned + Send + 'static>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_FORM_BYTES).and(warp::body::form())
}

fn no_cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

fn form_view(form: &'static str, fields: &'static [&'static str]) -> warp::reply::Json {
    warp::reply::json(&FormView {
        form,
        fields,
        holdings: None,
    })
}

fn see_other(path: &'static str) -> impl Reply {
    warp::redirect::see_other(Uri::from_static(path))
}

fn with_cookie(reply: impl Reply, cookie: String) -> impl Reply {
    warp::reply::with_header(reply, "set-cookie", cookie)
}

fn clearing_session(reply: impl Reply) -> impl Reply {
    with_cookie(reply, SessionKeys::clear_cookie())
}

fn reject(context: &str, e: AppError) -> Rejection {
    if e.status().is_server_error() {
        error!("{}: {}", context, e);
    } else {
        warn!("{}: {}", context, e);
    }
    warp::reject::custom(e)
}

fn apology(message: &str, status: StatusCode) -> Response {
    let body = warp::reply::json(&Apology {
        error: message,
        code: status.as_u16(),
    });
    warp::reply::with_status(body, status).into_response()
}

/// Turns every rejection into an apology, except `Unauthorized`, which
/// redirects to the login form.
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if let Some(e) = err.find::<AppError>() {
        if let AppError::Unauthorized = e {
            return Ok(see_other("/login").into_response());
        }
        return Ok(apology(&e.to_string(), e.status()));
    }

    let (message, status) = if err.is_not_found() {
        ("not found", StatusCode::NOT_FOUND)
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        ("method not allowed", StatusCode::METHOD_NOT_ALLOWED)
    } else if err.find::<warp::body::BodyDeserializeError>().is_some() {
        ("malformed form", StatusCode::BAD_REQUEST)
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        ("length required", StatusCode::LENGTH_REQUIRED)
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        ("form too large", StatusCode::PAYLOAD_TOO_LARGE)
    } else {
        error!("Unhandled rejection: {:?}", err);
        ("internal server error", StatusCode::INTERNAL_SERVER_ERROR)
    };
    Ok(apology(message, status))
}

/// Builds the portfolio view, falling back to unpriced holdings when a
/// lookup fails.
pub async fn portfolio_view(state: &AppState, user_id: UserId) -> Result<PortfolioView, AppError> {
    let cash = state.db.cash(user_id).await?;
    let positions = portfolio::positions(&state.db, user_id).await?;

    match portfolio::value_positions(positions.clone(), state.prices.as_ref()).await {
        Ok(priced) => {
            let value: Decimal = priced.iter().map(|p| p.value).sum();
            let holdings = priced
                .into_iter()
                .map(|p| PortfolioRow {
                    symbol: p.holding.symbol,
                    name: p.holding.name,
                    shares: p.holding.shares,
                    price: Some(usd(p.price)),
                    value: Some(usd(p.value)),
                })
                .collect();
            Ok(PortfolioView {
                cash: usd(cash),
                holdings,
                total: Some(usd(cash + value)),
            })
        }
        Err(e) => {
            warn!("Showing portfolio of user {} without valuation: {}", user_id, e);
            let holdings = positions
                .into_iter()
                .map(|h| PortfolioRow {
                    symbol: h.symbol,
                    name: h.name,
                    shares: h.shares,
                    price: None,
                    value: None,
                })
                .collect();
            Ok(PortfolioView {
                cash: usd(cash),
                holdings,
                total: None,
            })
        }
    }
}

async fn index_handler(user: SessionUser, state: AppState) -> Result<impl Reply, Rejection> {
    match portfolio_view(&state, user.user_id).await {
        Ok(view) => Ok(warp::reply::json(&view)),
        Err(e) => Err(reject("Failed to load portfolio", e)),
    }
}

async fn trade_handler(
    side: Side,
    user: SessionUser,
    state: AppState,
    form: TradeForm,
) -> Result<impl Reply, Rejection> {
    match trade::execute(&state.db, state.prices.as_ref(), user.user_id, side, &form).await {
        Ok(_) => Ok(see_other("/")),
        Err(e) => Err(reject("Trade rejected", e)),
    }
}

async fn buy_handler(
    user: SessionUser,
    state: AppState,
    form: TradeForm,
) -> Result<impl Reply, Rejection> {
    trade_handler(Side::Buy, user, state, form).await
}

async fn sell_handler(
    user: SessionUser,
    state: AppState,
    form: TradeForm,
) -> Result<impl Reply, Rejection> {
    trade_handler(Side::Sell, user, state, form).await
}

async fn sell_form_handler(user: SessionUser, state: AppState) -> Result<impl Reply, Rejection> {
    match portfolio::positions(&state.db, user.user_id).await {
        Ok(holdings) => Ok(warp::reply::json(&FormView {
            form: "sell",
            fields: &["symbol", "shares"],
            holdings: Some(holdings),
        })),
        Err(e) => Err(reject("Failed to load holdings", e.into())),
    }
}

async fn quote_handler(
    _user: SessionUser,
    state: AppState,
    form: QuoteForm,
) -> Result<impl Reply, Rejection> {
    let symbol = form.symbol.trim();
    if symbol.is_empty() {
        return Err(reject(
            "Quote rejected",
            AppError::InvalidSymbol("a stock symbol is needed".into()),
        ));
    }
    match state.prices.lookup(symbol).await {
        Some(quote) => {
            info!("Quoted {} at {}", quote.symbol, quote.price);
            Ok(warp::reply::json(&QuoteView {
                name: quote.name,
                symbol: quote.symbol,
                price: usd(quote.price),
            }))
        }
        None => Err(reject(
            "Quote rejected",
            AppError::InvalidSymbol(format!("symbol doesn't exist: {}", symbol)),
        )),
    }
}

async fn history_handler(user: SessionUser, state: AppState) -> Result<impl Reply, Rejection> {
    match state.db.transactions_for(user.user_id).await {
        Ok(transactions) => {
            let rows: Vec<HistoryRow> = transactions
                .into_iter()
                .map(|tx| HistoryRow {
                    date: tx.date.format("%Y-%m-%d %H:%M:%S").to_string(),
                    value: usd((tx.price * tx.shares).abs()),
                    price: usd(tx.price),
                    symbol: tx.symbol,
                    name: tx.name,
                    shares: tx.shares,
                })
                .collect();
            Ok(warp::reply::json(&rows))
        }
        Err(e) => Err(reject("Failed to load history", e.into())),
    }
}

fn start_session(state: &AppState, user_id: UserId) -> Result<impl Reply, Rejection> {
    let sessions = state.accounts.sessions();
    let token = sessions
        .issue(user_id)
        .map_err(|e| reject("Failed to issue session", e))?;
    Ok(with_cookie(see_other("/"), sessions.cookie(&token)))
}

async fn login_handler(state: AppState, form: LoginForm) -> Result<impl Reply, Rejection> {
    match state.accounts.login(&form).await {
        Ok(user_id) => start_session(&state, user_id),
        Err(e) => Err(reject("Login rejected", e)),
    }
}

async fn register_handler(state: AppState, form: RegisterForm) -> Result<impl Reply, Rejection> {
    match state.accounts.register(&form).await {
        Ok(user_id) => start_session(&state, user_id),
        Err(e) => Err(reject("Registration rejected", e)),
    }
}
