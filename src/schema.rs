// Diesel table definitions, kept in step with `Database::init_schema`.

diesel::table! {
    trials (id) {
        id -> Integer,
        video_name -> Text,
        task -> Nullable<Text>,
        modulation -> Nullable<Text>,
        date -> Nullable<Text>,
        name -> Nullable<Text>,
        health -> Nullable<Text>,
        genotype -> Nullable<Text>,
        dose_mult -> Nullable<Double>,
        maze -> Nullable<Integer>,
        center -> Nullable<Text>,
        num_frames -> Nullable<BigInt>,
        frame_rate -> Nullable<Double>,
        trial_length -> Nullable<Double>,
        video_width -> Nullable<Integer>,
        video_height -> Nullable<Integer>,
        csv_file_path -> Nullable<Text>,
        notes -> Nullable<Text>,
        ingested_at -> Text,
    }
}
