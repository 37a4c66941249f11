//! HTTP implementation of the backend contract.
//!
//! Row reads go through the PostgREST-style `/rest/{tabla}` surface with
//! equality filters, remote procedures through `/rpc/{name}`, and the
//! change feed / broadcast signals through server-sent events. The Spanish
//! wire schema is mapped to the core model here and nowhere else.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use asamblea_core::{
    AssemblyPhase, AssemblySnapshot, Attendance, BackendError, BackendResult, DebateClock,
    Directive, Proposal, ProposalStatus, ProxyGrant, ProxyStatus, VoteChoice, VoteTally,
};
use signal_bus::{assembly_channel, Signals};

use crate::backend::{AssemblyBackend, ChangeEvent, ChangeOp, CheckIn, Table};
use crate::config::ClientConfig;
use crate::directives::encode_directive;

/// Access code header checked by the backend gateway.
pub const ACCESS_CODE_HEADER: &str = "x-codigo-acceso";

const FEED_QUEUE_DEPTH: usize = 64;
const FEED_RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base: Url,
    codigo: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> BackendResult<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|err| BackendError::Validation(format!("invalid base url: {err}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            codigo: config.codigo.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> BackendResult<Url> {
        let trimmed = path.trim();
        let normalized: Cow<'_, str> = if trimmed.starts_with('/') {
            Cow::Borrowed(trimmed)
        } else {
            Cow::Owned(format!("/{trimmed}"))
        };
        self.base
            .join(normalized.as_ref())
            .map_err(|err| BackendError::Rejected(format!("invalid endpoint url: {err}")))
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, url);
        if let Some(codigo) = &self.codigo {
            builder = builder.header(ACCESS_CODE_HEADER, codigo);
        }
        builder
    }

    async fn get_rows<R: DeserializeOwned>(&self, path: &str) -> BackendResult<Vec<R>> {
        let url = self.endpoint(path)?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(transport)?;
        let response = expect_success(response).await?;
        response.json::<Vec<R>>().await.map_err(transport)
    }

    async fn rpc<A, R>(&self, name: &str, args: &A) -> BackendResult<R>
    where
        A: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = self.endpoint(&format!("/rpc/{name}"))?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(args)
            .send()
            .await
            .map_err(transport)?;
        let response = expect_success(response).await?;
        response.json::<R>().await.map_err(transport)
    }

    /// RPCs without a result payload; the body is drained and discarded.
    async fn rpc_unit<A>(&self, name: &str, args: &A) -> BackendResult<()>
    where
        A: Serialize + ?Sized + Sync,
    {
        let url = self.endpoint(&format!("/rpc/{name}"))?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(args)
            .send()
            .await
            .map_err(transport)?;
        let response = expect_success(response).await?;
        response.text().await.map_err(transport)?;
        Ok(())
    }

    /// Publishes an admin directive onto the assembly's broadcast channel.
    pub async fn send_directive(&self, assembly: Uuid, directive: &Directive) -> BackendResult<()> {
        let channel = assembly_channel(assembly);
        let url = self.endpoint(&format!("/broadcast/{channel}"))?;
        let envelope = encode_directive(directive)
            .map_err(|err| BackendError::Rejected(format!("encode directive: {err}")))?;
        let response = self
            .request(reqwest::Method::POST, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(envelope)
            .send()
            .await
            .map_err(transport)?;
        expect_success(response).await?;
        Ok(())
    }

    /// Forwards the assembly's broadcast channel onto a local signal bus so
    /// in-process subscribers see remote directives. Runs until aborted.
    pub fn spawn_directive_relay<S: Signals + 'static>(
        &self,
        signals: Arc<S>,
        assembly: Uuid,
    ) -> JoinHandle<()> {
        let channel = assembly_channel(assembly);
        let client = self.clone();
        tokio::spawn(async move {
            let url = match client.endpoint(&format!("/broadcast/{channel}")) {
                Ok(url) => url,
                Err(err) => {
                    warn!(
                        target = "asamblea.http",
                        error = %err,
                        "invalid broadcast channel url"
                    );
                    return;
                }
            };
            loop {
                let request = client.request(reqwest::Method::GET, url.clone());
                let mut source = match EventSource::new(request) {
                    Ok(source) => source,
                    Err(err) => {
                        warn!(target = "asamblea.http", error = %err, "signal relay request failed");
                        return;
                    }
                };
                while let Some(event) = source.next().await {
                    match event {
                        Ok(Event::Open) => {
                            debug!(target = "asamblea.http", channel = %channel, "signal relay connected")
                        }
                        Ok(Event::Message(message)) => {
                            if message.event != "signal" {
                                continue;
                            }
                            if let Err(err) = signals.send(&channel, Bytes::from(message.data)) {
                                warn!(
                                    target = "asamblea.http",
                                    error = %err,
                                    "signal relay delivery failed"
                                );
                            }
                        }
                        Err(err) => {
                            warn!(
                                target = "asamblea.http",
                                error = %err,
                                "signal relay interrupted; reconnecting"
                            );
                            source.close();
                            break;
                        }
                    }
                }
                tokio::time::sleep(FEED_RECONNECT_DELAY).await;
            }
        })
    }

    async fn relay_changes(self, url: Url, tx: mpsc::Sender<ChangeEvent>) {
        loop {
            let request = self.request(reqwest::Method::GET, url.clone());
            let mut source = match EventSource::new(request) {
                Ok(source) => source,
                Err(err) => {
                    warn!(target = "asamblea.http", error = %err, "change feed request failed");
                    return;
                }
            };
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => {
                        debug!(target = "asamblea.http", "change feed connected")
                    }
                    Ok(Event::Message(message)) => {
                        if message.event != "change" {
                            continue;
                        }
                        match serde_json::from_str::<ChangeEventWire>(&message.data) {
                            Ok(wire) => {
                                if tx.send(wire.into()).await.is_err() {
                                    source.close();
                                    return;
                                }
                            }
                            Err(err) => warn!(
                                target = "asamblea.http",
                                error = %err,
                                "undecodable change event"
                            ),
                        }
                    }
                    Err(err) => {
                        warn!(
                            target = "asamblea.http",
                            error = %err,
                            "change feed interrupted; reconnecting"
                        );
                        source.close();
                        break;
                    }
                }
            }
            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(FEED_RECONNECT_DELAY).await;
        }
    }
}

#[async_trait]
impl AssemblyBackend for HttpBackend {
    async fn fetch_assembly(&self, assembly: Uuid) -> BackendResult<Option<AssemblySnapshot>> {
        let rows: Vec<AsambleaRow> = self
            .get_rows(&format!("/rest/asambleas?id=eq.{assembly}"))
            .await?;
        Ok(rows.into_iter().next().map(Into::into))
    }

    async fn fetch_attendances(&self, assembly: Uuid) -> BackendResult<Vec<Attendance>> {
        let rows: Vec<AsistenciaRow> = self
            .get_rows(&format!("/rest/asistencias?asamblea_id=eq.{assembly}"))
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn fetch_proposals(&self, assembly: Uuid) -> BackendResult<Vec<Proposal>> {
        let rows: Vec<PropuestaRow> = self
            .get_rows(&format!(
                "/rest/propuestas?asamblea_id=eq.{assembly}&order=orden"
            ))
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn fetch_households(&self) -> BackendResult<Vec<Uuid>> {
        let rows: Vec<ViviendaRow> = self.get_rows("/rest/viviendas?select=id").await?;
        Ok(rows.into_iter().map(|row| row.id).collect())
    }

    async fn check_in(&self, assembly: Uuid, request: CheckIn) -> BackendResult<Attendance> {
        let url = self.endpoint("/rest/asistencias")?;
        let row = NuevaAsistenciaRow {
            asamblea_id: assembly,
            vivienda_id: request.household,
            nombre_asistente: &request.attendee_name,
            es_poder: request.proxy_for.is_some(),
            vivienda_representada_id: request.proxy_for,
        };
        let response = self
            .request(reqwest::Method::POST, url)
            .header("prefer", "return=representation")
            .json(&row)
            .send()
            .await
            .map_err(transport)?;
        let response = expect_success(response).await?;
        let rows = response.json::<Vec<AsistenciaRow>>().await.map_err(transport)?;
        rows.into_iter()
            .next()
            .map(Into::into)
            .ok_or_else(|| BackendError::Rejected("check-in returned no row".into()))
    }

    async fn complete_exit_form(&self, attendance: Uuid) -> BackendResult<()> {
        let url = self.endpoint(&format!("/rest/asistencias?id=eq.{attendance}"))?;
        let response = self
            .request(reqwest::Method::PATCH, url)
            .json(&serde_json::json!({ "formulario_salida_completado": true }))
            .send()
            .await
            .map_err(transport)?;
        expect_success(response).await?;
        Ok(())
    }

    async fn remove_attendance(&self, attendance: Uuid) -> BackendResult<()> {
        let url = self.endpoint(&format!("/rest/asistencias?id=eq.{attendance}"))?;
        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .map_err(transport)?;
        expect_success(response).await?;
        Ok(())
    }

    async fn cast_vote(
        &self,
        proposal: Uuid,
        household: Uuid,
        choice: VoteChoice,
    ) -> BackendResult<()> {
        self.rpc_unit(
            "registrar_voto",
            &serde_json::json!({
                "propuesta_id": proposal,
                "vivienda_id": household,
                "voto": choice,
            }),
        )
        .await
    }

    async fn open_voting(&self, proposal: Uuid) -> BackendResult<()> {
        self.rpc_unit("abrir_votacion", &serde_json::json!({ "propuesta_id": proposal }))
            .await
    }

    async fn close_voting(&self, proposal: Uuid) -> BackendResult<()> {
        self.rpc_unit("cerrar_votacion", &serde_json::json!({ "propuesta_id": proposal }))
            .await
    }

    async fn publish_results(&self, proposal: Uuid) -> BackendResult<()> {
        self.rpc_unit(
            "mostrar_resultados",
            &serde_json::json!({ "propuesta_id": proposal }),
        )
        .await
    }

    async fn results_tally(&self, proposal: Uuid) -> BackendResult<VoteTally> {
        let row: EstadisticasRow = self
            .rpc(
                "estadisticas_votacion",
                &serde_json::json!({ "propuesta_id": proposal }),
            )
            .await?;
        Ok(row.into())
    }

    async fn start_debate_clock(&self, assembly: Uuid, duration_seconds: u64) -> BackendResult<()> {
        self.rpc_unit(
            "iniciar_cronometro_debate",
            &serde_json::json!({
                "asamblea_id": assembly,
                "duracion_segundos": duration_seconds,
            }),
        )
        .await
    }

    async fn pause_debate_clock(&self, assembly: Uuid) -> BackendResult<()> {
        self.rpc_unit(
            "pausar_cronometro_debate",
            &serde_json::json!({ "asamblea_id": assembly }),
        )
        .await
    }

    async fn resume_debate_clock(&self, assembly: Uuid) -> BackendResult<()> {
        self.rpc_unit(
            "reanudar_cronometro_debate",
            &serde_json::json!({ "asamblea_id": assembly }),
        )
        .await
    }

    async fn stop_debate_clock(&self, assembly: Uuid) -> BackendResult<()> {
        self.rpc_unit(
            "detener_cronometro_debate",
            &serde_json::json!({ "asamblea_id": assembly }),
        )
        .await
    }

    async fn changes(&self, assembly: Uuid) -> BackendResult<BoxStream<'static, ChangeEvent>> {
        let url = self.endpoint(&format!("/realtime/asambleas/{assembly}"))?;
        let (tx, rx) = mpsc::channel(FEED_QUEUE_DEPTH);
        let client = self.clone();
        tokio::spawn(client.relay_changes(url, tx));
        Ok(ReceiverStream::new(rx).boxed())
    }
}

async fn expect_success(response: reqwest::Response) -> BackendResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(decode_error(response).await)
}

async fn decode_error(response: reqwest::Response) -> BackendError {
    let status = response.status();
    match response.json::<WireError>().await {
        Ok(wire) => BackendError::from_wire(wire.codigo.as_deref(), &wire.mensaje),
        Err(_) => BackendError::Rejected(format!("http status {status}")),
    }
}

fn transport(err: reqwest::Error) -> BackendError {
    BackendError::Transient(err.to_string())
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    codigo: Option<String>,
    #[serde(default)]
    mensaje: String,
}

#[derive(Debug, Deserialize)]
struct ChangeEventWire {
    tabla: Table,
    op: ChangeOp,
}

impl From<ChangeEventWire> for ChangeEvent {
    fn from(wire: ChangeEventWire) -> Self {
        ChangeEvent {
            table: wire.tabla,
            op: wire.op,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum EstadoAsamblea {
    Abierta,
    Cerrada,
}

#[derive(Debug, Deserialize)]
struct AsambleaRow {
    id: Uuid,
    estado: EstadoAsamblea,
    #[serde(default)]
    hora_limite_ingreso: Option<DateTime<Utc>>,
    #[serde(default)]
    propuesta_activa_id: Option<Uuid>,
    #[serde(default)]
    resultados_publicados_id: Option<Uuid>,
    cronometro_activo: bool,
    cronometro_pausado: bool,
    #[serde(default)]
    cronometro_inicio: Option<DateTime<Utc>>,
    cronometro_duracion_segundos: u64,
    cronometro_segundos_pausados: u64,
}

impl From<AsambleaRow> for AssemblySnapshot {
    fn from(row: AsambleaRow) -> Self {
        AssemblySnapshot {
            id: row.id,
            phase: match row.estado {
                EstadoAsamblea::Abierta => AssemblyPhase::Open,
                EstadoAsamblea::Cerrada => AssemblyPhase::Closed,
            },
            entry_cutoff: row.hora_limite_ingreso,
            active_proposal: row.propuesta_activa_id,
            published_results: row.resultados_publicados_id,
            clock: DebateClock {
                active: row.cronometro_activo,
                paused: row.cronometro_pausado,
                started_at: row.cronometro_inicio,
                duration_seconds: row.cronometro_duracion_segundos,
                paused_elapsed_seconds: row.cronometro_segundos_pausados,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum EstadoPoder {
    Pendiente,
    Aprobado,
    Rechazado,
}

impl From<EstadoPoder> for ProxyStatus {
    fn from(estado: EstadoPoder) -> Self {
        match estado {
            EstadoPoder::Pendiente => ProxyStatus::Pending,
            EstadoPoder::Aprobado => ProxyStatus::Approved,
            EstadoPoder::Rechazado => ProxyStatus::Rejected,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AsistenciaRow {
    id: Uuid,
    vivienda_id: Uuid,
    nombre_asistente: String,
    #[serde(default)]
    es_poder: bool,
    #[serde(default)]
    vivienda_representada_id: Option<Uuid>,
    #[serde(default)]
    estado_poder: Option<EstadoPoder>,
    #[serde(default)]
    formulario_salida_completado: bool,
    #[serde(default)]
    salida_autorizada: bool,
}

impl From<AsistenciaRow> for Attendance {
    fn from(row: AsistenciaRow) -> Self {
        let proxy = match (row.es_poder, row.vivienda_representada_id, row.estado_poder) {
            (true, Some(represented_household), Some(estado)) => Some(ProxyGrant {
                represented_household,
                status: estado.into(),
            }),
            _ => None,
        };
        Attendance {
            id: row.id,
            household: row.vivienda_id,
            attendee_name: row.nombre_asistente,
            proxy,
            exit_form_completed: row.formulario_salida_completado,
            exit_authorized: row.salida_autorizada,
        }
    }
}

#[derive(Debug, Serialize)]
struct NuevaAsistenciaRow<'a> {
    asamblea_id: Uuid,
    vivienda_id: Uuid,
    nombre_asistente: &'a str,
    es_poder: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    vivienda_representada_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum EstadoPropuesta {
    Borrador,
    Abierta,
    Cerrada,
}

#[derive(Debug, Deserialize)]
struct PropuestaRow {
    id: Uuid,
    asamblea_id: Uuid,
    titulo: String,
    #[serde(default)]
    descripcion: Option<String>,
    orden: u32,
    estado: EstadoPropuesta,
}

impl From<PropuestaRow> for Proposal {
    fn from(row: PropuestaRow) -> Self {
        Proposal {
            id: row.id,
            assembly: row.asamblea_id,
            title: row.titulo,
            description: row.descripcion,
            position: row.orden,
            status: match row.estado {
                EstadoPropuesta::Borrador => ProposalStatus::Draft,
                EstadoPropuesta::Abierta => ProposalStatus::Open,
                EstadoPropuesta::Cerrada => ProposalStatus::Closed,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ViviendaRow {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct EstadisticasRow {
    propuesta_id: Uuid,
    votos_si: u64,
    votos_no: u64,
    total_viviendas: u64,
    abstenciones: u64,
}

impl From<EstadisticasRow> for VoteTally {
    fn from(row: EstadisticasRow) -> Self {
        VoteTally {
            proposal: row.propuesta_id,
            si: row.votos_si,
            no: row.votos_no,
            total: row.total_viviendas,
            abstentions: row.abstenciones,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_assembly_wire_row() {
        let json = serde_json::json!({
            "id": "6f9a2f35-4b7e-4f7e-9a31-27e2a9f0c8d1",
            "estado": "abierta",
            "hora_limite_ingreso": "2026-03-14T19:30:00Z",
            "propuesta_activa_id": null,
            "resultados_publicados_id": null,
            "cronometro_activo": true,
            "cronometro_pausado": true,
            "cronometro_inicio": null,
            "cronometro_duracion_segundos": 300,
            "cronometro_segundos_pausados": 120
        });
        let row: AsambleaRow = serde_json::from_value(json).unwrap();
        let snapshot: AssemblySnapshot = row.into();
        assert_eq!(snapshot.phase, AssemblyPhase::Open);
        assert!(snapshot.entry_cutoff.is_some());
        assert!(snapshot.clock.paused);
        assert_eq!(snapshot.clock.paused_elapsed_seconds, 120);
    }

    #[test]
    fn decodes_attendance_with_approved_proxy() {
        let represented = Uuid::new_v4();
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "vivienda_id": Uuid::new_v4(),
            "nombre_asistente": "Ana Torres",
            "es_poder": true,
            "vivienda_representada_id": represented,
            "estado_poder": "aprobado",
            "formulario_salida_completado": false,
            "salida_autorizada": false
        });
        let row: AsistenciaRow = serde_json::from_value(json).unwrap();
        let attendance: Attendance = row.into();
        let proxy = attendance.proxy.expect("proxy present");
        assert_eq!(proxy.represented_household, represented);
        assert_eq!(proxy.status, ProxyStatus::Approved);
    }

    #[test]
    fn attendance_without_proxy_fields_maps_to_none() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "vivienda_id": Uuid::new_v4(),
            "nombre_asistente": "Luis Prada"
        });
        let row: AsistenciaRow = serde_json::from_value(json).unwrap();
        let attendance: Attendance = row.into();
        assert!(attendance.proxy.is_none());
        assert!(!attendance.exit_form_completed);
    }

    #[test]
    fn decodes_change_events() {
        let wire: ChangeEventWire =
            serde_json::from_str(r#"{"tabla":"asistencias","op":"insert"}"#).unwrap();
        let event: ChangeEvent = wire.into();
        assert_eq!(event.table, Table::Attendances);
        assert_eq!(event.op, ChangeOp::Insert);
    }

    #[test]
    fn endpoint_joins_relative_and_absolute_paths() {
        let backend = HttpBackend::new(&ClientConfig {
            base_url: "http://backend.local:54321".into(),
            ..ClientConfig::default()
        })
        .unwrap();
        assert_eq!(
            backend.endpoint("/rest/asambleas").unwrap().as_str(),
            "http://backend.local:54321/rest/asambleas"
        );
        assert_eq!(
            backend.endpoint("rpc/registrar_voto").unwrap().as_str(),
            "http://backend.local:54321/rpc/registrar_voto"
        );
    }
}
